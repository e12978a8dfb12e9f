//! Resolver behaviour against a scripted platform.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pretty_assertions::assert_eq;
use serde_json::json;
use sha2::{Digest, Sha256};

use common::{alive, ok, page, room_info, user_room, FakeTransport};
use tiklive::{
    Platform, RecorderError, ResolvedTarget, Restriction, StreamQuality, TransportError,
    WatchTarget,
};

fn platform(fake: &Arc<FakeTransport>) -> Platform {
    Platform::new(fake.clone())
}

#[tokio::test]
async fn resolves_each_kind_of_target() {
    let fake = Arc::new(FakeTransport::new(|request| {
        if request.url.ends_with("/api-live/user/room/") {
            assert_eq!(request.param("uniqueId"), Some("alice"));
            ok(user_room("7001"))
        } else if request.url.ends_with("/webcast/room/info/") {
            assert_eq!(request.param("room_id"), Some("7002"));
            ok(room_info("bob", "https://cdn/bob.flv"))
        } else if request.url == "https://www.tiktok.com/@alice/live" {
            assert!(!request.follow_redirects);
            page(200, "<html>profile</html>")
        } else {
            panic!("unexpected request {}", request.url)
        }
    }));
    let platform = platform(&fake);

    let alice = ResolvedTarget {
        handle: "alice".into(),
        room: "7001".into(),
    };
    assert_eq!(
        platform
            .resolve_target(&WatchTarget::handle("@alice"))
            .await
            .unwrap(),
        alice
    );
    assert_eq!(
        platform
            .resolve_target(&WatchTarget::Url(
                "https://www.tiktok.com/@alice/live".into()
            ))
            .await
            .unwrap(),
        alice
    );
    assert_eq!(
        platform
            .resolve_target(&WatchTarget::Room("7002".into()))
            .await
            .unwrap(),
        ResolvedTarget {
            handle: "bob".into(),
            room: "7002".into(),
        }
    );
}

#[tokio::test]
async fn share_links_and_blocked_regions() {
    let fake = Arc::new(FakeTransport::new(|request| match request.url.as_str() {
        "https://vm.tiktok.com/ZM123/" => page(
            301,
            r#"<a href="https://www.tiktok.com/@carol/live?_r=1">Moved</a>"#,
        ),
        "https://vm.tiktok.com/blocked/" => page(302, ""),
        "https://www.tiktok.com/@dave" => page(200, "<html></html>"),
        url if url.ends_with("/api-live/user/room/") => ok(user_room("42")),
        url => panic!("unexpected request {}", url),
    }));
    let platform = platform(&fake);

    let resolved = platform
        .room_and_user_from_url("https://vm.tiktok.com/ZM123/")
        .await
        .unwrap();
    assert_eq!(resolved.handle, "carol");
    assert_eq!(resolved.room, "42");

    assert!(matches!(
        platform
            .room_and_user_from_url("https://vm.tiktok.com/blocked/")
            .await,
        Err(RecorderError::AccessRestricted(Restriction::RegionBlocked { mode: None }))
    ));

    assert!(matches!(
        platform
            .room_and_user_from_url("https://www.tiktok.com/@dave")
            .await,
        Err(RecorderError::TargetNotFound(_))
    ));
}

#[tokio::test]
async fn private_accounts_map_to_distinct_restrictions() {
    let fake = Arc::new(FakeTransport::new(|request| {
        match request.param("room_id") {
            Some("1") => ok(json!({ "data": { "prompts": "Follow the creator to watch their LIVE" } })),
            Some("2") => ok(json!({ "data": { "message": "This account is private" } })),
            Some("3") => ok(json!({ "status_code": 4003110, "data": {} })),
            _ => ok(json!({ "data": {} })),
        }
    }));
    let platform = platform(&fake);

    assert!(matches!(
        platform.user_from_room("1").await,
        Err(RecorderError::AccessRestricted(Restriction::FollowRequired))
    ));
    assert!(matches!(
        platform.user_from_room("2").await,
        Err(RecorderError::AccessRestricted(Restriction::AccountPrivate))
    ));
    assert!(matches!(
        platform.select_stream_url("3").await,
        Err(RecorderError::AccessRestricted(Restriction::LoginRequired))
    ));
    assert!(matches!(
        platform.user_from_room("4").await,
        Err(RecorderError::TargetResolution(_))
    ));
    assert_eq!(platform.select_stream_url("4").await.unwrap(), None);
}

#[tokio::test]
async fn stream_url_prefers_sdk_quality() {
    let fake = Arc::new(FakeTransport::new(|_| {
        ok(room_info("alice", "https://cdn/origin.flv"))
    }));
    let descriptor = platform(&fake)
        .select_stream_url("9")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(descriptor.url, "https://cdn/origin.flv");
    assert_eq!(
        descriptor.quality,
        StreamQuality::Sdk {
            key: "origin".into(),
            level: 10
        }
    );
}

#[tokio::test]
async fn liveness_is_fail_safe() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let fake = Arc::new(FakeTransport::new(move |request| {
        counter.fetch_add(1, Ordering::SeqCst);
        match request.param("room_ids") {
            Some("up") => ok(alive(true)),
            Some("down") => ok(alive(false)),
            Some("garbled") => page(200, "not json"),
            _ => Err(TransportError::Request {
                url: request.url.clone(),
                message: "connection reset".into(),
            }),
        }
    }));
    let platform = platform(&fake);

    assert!(platform.is_room_alive("up").await);
    assert!(!platform.is_room_alive("down").await);
    assert!(!platform.is_room_alive("garbled").await);
    assert!(!platform.is_room_alive("broken").await);
    // empty room ids never hit the network
    assert!(!platform.is_room_alive("").await);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn follower_pagination_stops_on_stale_cursor() {
    let fake = Arc::new(FakeTransport::new(|request| {
        let page_users = match request.param("minCursor") {
            Some("0") => json!([{ "user": { "uniqueId": "alice" } }, { "user": { "uniqueId": "bob" } }]),
            _ => json!([{ "user": { "uniqueId": "carol" } }]),
        };
        // the platform keeps claiming more pages but the cursor stalls at 30
        ok(json!({ "userList": page_users, "hasMore": true, "minCursor": 30 }))
    }));
    let platform = platform(&fake);

    let handles = platform.follower_handles("SEC").await.unwrap();
    assert_eq!(handles, vec!["alice", "bob", "carol"]);
    assert_eq!(fake.hits("/api/user/list/"), 2);

    let cursors: Vec<String> = fake
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter_map(|r| r.param("maxCursor").map(str::to_string))
        .collect();
    assert_eq!(cursors, vec!["0", "30"]);
}

#[tokio::test]
async fn empty_follow_list_is_an_error() {
    let fake = Arc::new(FakeTransport::new(|_| {
        ok(json!({ "userList": [], "hasMore": false, "minCursor": 0 }))
    }));
    assert!(matches!(
        platform(&fake).follower_handles("SEC").await,
        Err(RecorderError::EmptyFollowerSet)
    ));
}

#[tokio::test]
async fn secondary_uid_and_authentication() {
    let fake = Arc::new(FakeTransport::new(|_| {
        page(200, r#"<script>{"secUid":"MS4wLjABAAAAxyz","nickname":"me"}</script>"#)
    }));
    let platform = platform(&fake);
    assert_eq!(platform.secondary_uid().await.unwrap(), "MS4wLjABAAAAxyz");
    assert!(platform.is_authenticated().await);

    let logged_out = Arc::new(FakeTransport::new(|_| {
        page(200, r#"<div class="login-title">Log in</div>"#)
    }));
    let platform = Platform::new(logged_out);
    assert!(!platform.is_authenticated().await);
    assert!(matches!(
        platform.secondary_uid().await,
        Err(RecorderError::SecondaryUidUnavailable)
    ));
}

fn challenge_page(prefix: &[u8], nonce: u64) -> String {
    let digest = Sha256::new()
        .chain_update(prefix)
        .chain_update(nonce.to_string())
        .finalize();
    let payload = json!({ "v": { "a": STANDARD.encode(prefix), "c": STANDARD.encode(digest) } });
    format!(
        r#"<p id="wci" class="_wafchallengeid"></p><p id="cs" class="{}"></p>"#,
        STANDARD.encode(payload.to_string())
    )
}

#[tokio::test]
async fn challenge_is_solved_and_request_retried() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let fake = Arc::new(FakeTransport::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            page(200, &challenge_page(b"waf-prefix", 777))
        } else {
            ok(user_room("55"))
        }
    }));
    let platform = platform(&fake);

    assert_eq!(platform.room_from_user("alice").await.unwrap(), "55");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    let cookies = fake.cookies.lock().unwrap().clone();
    assert_eq!(cookies.len(), 1);
    assert_eq!(cookies[0].0, "_wafchallengeid");
}

#[tokio::test]
async fn repeated_challenge_is_rejected() {
    let fake = Arc::new(FakeTransport::new(|_| {
        page(200, &challenge_page(b"again", 3))
    }));
    let err = platform(&fake).room_from_user("alice").await.unwrap_err();
    assert!(err.is_unsolvable_challenge());
    assert_eq!(fake.hits("/api-live/user/room/"), 2);
}

#[tokio::test]
async fn region_probe_reads_redirect() {
    let blocked = Arc::new(FakeTransport::new(|request| {
        assert!(!request.follow_redirects);
        page(302, "")
    }));
    assert!(platform(&blocked).check_region_blocked().await);

    let open = Arc::new(FakeTransport::new(|_| page(200, "<html></html>")));
    assert!(!platform(&open).check_region_blocked().await);
}
