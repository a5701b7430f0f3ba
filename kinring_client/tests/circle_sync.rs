use kinring_client::circle::{CareCircleService, SetupPhase, CODE_ALPHABET, CODE_LENGTH};
use kinring_client::error::SyncError;
use kinring_client::models::{object, Role, UserIdentity};
use kinring_client::services::check_in::CheckInService;
use kinring_client::services::help_exchange::HelpExchangeService;
use kinring_client::services::member_status::MemberStatusService;
use kinring_client::services::photos::PhotoService;
use kinring_client::services::pings::PingService;
use kinring_client::services::profile::UserProfileService;
use kinring_client::sync::subscriber::ScopedSubscription;
use kinring_backend::{QuerySpec, Store};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, Duration, Instant};

const SAMPLE_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

fn test_store() -> (Store, TempDir) {
    let temp = tempdir().expect("tempdir");
    let store = Store::open_in_memory(temp.path().join("blobs")).expect("store");
    (store, temp)
}

fn senior(name: &str) -> UserIdentity {
    UserIdentity {
        user_id: format!("user_{}", name.to_lowercase()),
        display_name: name.to_string(),
        role: Role::Senior,
    }
}

fn relative(name: &str) -> UserIdentity {
    UserIdentity {
        user_id: format!("user_{}", name.to_lowercase()),
        display_name: name.to_string(),
        role: Role::Relative,
    }
}

/// Mirrors update on background tasks; poll until the condition holds.
async fn wait_until(description: &str, predicate: impl Fn() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time: {description}");
}

#[tokio::test]
async fn owner_creates_circle_and_relative_joins_by_code() {
    let (store, _temp) = test_store();
    let astrid = senior("Astrid");
    let bjorn = relative("Bjorn");

    let mut astrid_circle = CareCircleService::new(store.clone(), astrid.clone());
    let circle_id = astrid_circle.create_circle("Astrid").expect("create circle");
    assert_eq!(astrid_circle.phase(), SetupPhase::Created);

    let code = astrid_circle.invite_code().expect("invite code").to_string();
    assert_eq!(code.len(), CODE_LENGTH);
    assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));

    // Join is case-insensitive.
    let mut bjorn_circle = CareCircleService::new(store.clone(), bjorn.clone());
    let joined_id = bjorn_circle
        .join_circle(&code.to_lowercase(), "Bjorn", Some("son"))
        .expect("join circle");
    assert_eq!(joined_id, circle_id);
    assert_eq!(bjorn_circle.phase(), SetupPhase::Joined);

    let membership = store
        .get("memberships", &format!("{circle_id}_{}", bjorn.user_id))
        .expect("membership read")
        .expect("membership exists");
    assert_eq!(membership.str_field("role"), Some("relative"));
    assert_eq!(membership.str_field("circleId"), Some(circle_id.as_str()));

    wait_until("both members mirrored", || bjorn_circle.members().len() == 2).await;

    // The owner reports being home; the relative's mirror picks it up.
    let astrid_status = MemberStatusService::new(&store, astrid.clone(), Some(&circle_id));
    let bjorn_status = MemberStatusService::new(&store, bjorn.clone(), Some(&circle_id));
    astrid_status.set_my_status("home");

    wait_until("senior status mirrored", || {
        bjorn_status.senior_status().is_some()
    })
    .await;
    let seen = bjorn_status.senior_status().expect("senior status");
    assert_eq!(seen.display_name, "Astrid");
    assert_eq!(seen.status, "home");
    assert_eq!(seen.role, Role::Senior);
}

#[tokio::test]
async fn invalid_code_returns_to_no_circle_with_message() {
    let (store, _temp) = test_store();
    let mut service = CareCircleService::new(store, relative("Bjorn"));

    // Malformed: rejected before any store call.
    let err = service.join_circle("NOPE", "Bjorn", None).unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
    assert_eq!(service.phase(), SetupPhase::NoCircle);

    // Well-formed but unknown.
    let err = service.join_circle("ABC234", "Bjorn", None).unwrap_err();
    assert_eq!(err, SyncError::Validation("Invalid invite code.".into()));
    assert_eq!(service.phase(), SetupPhase::NoCircle);
    assert!(service.errors().current().is_some());
    assert!(!service.has_circle());
}

#[tokio::test]
async fn resolution_falls_back_to_full_scan_and_reports_no_circle_cleanly() {
    let (store, _temp) = test_store();

    store
        .merge_write(
            "circles",
            "circle_legacy",
            object(json!({"seniorId": "4711", "seniorName": "Gerda", "inviteCode": "QRSTU2"})),
            &["createdAt"],
        )
        .expect("seed circle");
    // Legacy membership row with a numeric user id: invisible to the typed
    // index lookup, found by the scan.
    store
        .merge_write(
            "memberships",
            "circle_legacy_4711",
            object(json!({"circleId": "circle_legacy", "userId": 4711, "role": "senior"})),
            &["joinedAt"],
        )
        .expect("seed membership");

    let gerda = UserIdentity {
        user_id: "4711".to_string(),
        display_name: "Gerda".to_string(),
        role: Role::Senior,
    };
    let mut service = CareCircleService::new(store.clone(), gerda);
    let resolved = service.resolve().expect("resolve");
    assert_eq!(resolved.as_deref(), Some("circle_legacy"));
    assert!(service.has_circle());

    // Zero matches on both paths reports "no circle" without erroring.
    let mut stranger = CareCircleService::new(store, relative("Nobody"));
    assert_eq!(stranger.resolve().expect("resolve"), None);
    assert!(!stranger.has_circle());
}

#[tokio::test]
async fn mirror_holds_only_the_most_recent_window() {
    let (store, _temp) = test_store();
    let circle_id = "circle_window";

    // Controlled timestamps so ordering is unambiguous.
    for n in 0..12 {
        store
            .merge_write(
                &format!("circles/{circle_id}/pings"),
                &format!("ping_{n}"),
                object(json!({
                    "fromName": "Bjorn",
                    "fromUserId": "user_bjorn",
                    "toRole": "senior",
                    "sentAt": format!("2026-08-07T10:00:{:02}.000Z", n),
                })),
                &[],
            )
            .expect("seed ping");
    }

    let astrid_pings = PingService::new(&store, senior("Astrid"), Some(circle_id));
    wait_until("ping window mirrored", || astrid_pings.pings().len() == 10).await;

    let pings = astrid_pings.pings();
    // Most recent ten, newest first; the two oldest are invisible.
    assert_eq!(pings[0].doc_id, "ping_11");
    assert_eq!(pings[9].doc_id, "ping_2");
}

#[tokio::test]
async fn subscription_teardown_is_idempotent() {
    let (store, _temp) = test_store();
    let subscription: ScopedSubscription<kinring_backend::Document> = ScopedSubscription::open(
        &store,
        Some("circles/c1/pings".to_string()),
        QuerySpec::default(),
        Default::default(),
        |doc| Some(doc.clone()),
    );
    wait_until("initial snapshot", || !subscription.loading()).await;

    subscription.close();
    subscription.close();

    store
        .merge_write("circles/c1/pings", "ping_1", object(json!({"x": 1})), &["sentAt"])
        .expect("write after teardown");
    sleep(Duration::from_millis(50)).await;
    assert!(subscription.items().is_empty());
    drop(subscription);
}

#[tokio::test]
async fn null_circle_clears_mirror_as_async_completion() {
    let (store, _temp) = test_store();
    let statuses = MemberStatusService::new(&store, relative("Bjorn"), None);
    wait_until("cleared mirror settles", || !statuses.loading()).await;
    assert!(statuses.statuses().is_empty());
    assert_eq!(statuses.my_status(), "home");
}

#[tokio::test]
async fn ping_reaches_the_other_member_and_dismiss_clears_it() {
    let (store, _temp) = test_store();
    let circle_id = "circle_pings";
    let astrid_pings = PingService::new(&store, senior("Astrid"), Some(circle_id));
    let bjorn_pings = PingService::new(&store, relative("Bjorn"), Some(circle_id));

    bjorn_pings.send_ping(Role::Senior).expect("circle scoped");

    wait_until("ping surfaced", || astrid_pings.latest().is_some()).await;
    let ping = astrid_pings.latest().expect("latest ping");
    assert_eq!(ping.from_name, "Bjorn");

    // The sender never sees their own ping as "for me".
    sleep(Duration::from_millis(50)).await;
    assert!(bjorn_pings.latest().is_none());

    astrid_pings.dismiss();
    assert!(astrid_pings.latest().is_none());
}

#[tokio::test]
async fn disallowed_fields_never_reach_the_store() {
    let (store, _temp) = test_store();
    let circle_id = "circle_help";
    let help = HelpExchangeService::new(&store, relative("Bjorn"), Some(circle_id));

    help.add_offer(object(json!({
        "id": "groceries",
        "label": "Groceries",
        "emoji": "🛒",
        "icon": {"component": "ShoppingCart"},
    })))
    .expect("circle scoped");

    wait_until("offer mirrored", || help.offers().len() == 1).await;

    let stored = store
        .list_all(&format!("circles/{circle_id}/helpOffers"))
        .expect("list offers");
    assert_eq!(stored.len(), 1);
    let doc = &stored[0];
    assert_eq!(doc.str_field("id"), Some("groceries"));
    assert_eq!(doc.str_field("label"), Some("Groceries"));
    assert_eq!(doc.str_field("emoji"), Some("🛒"));
    assert!(doc.has_value("createdAt"));
    assert!(!doc.fields.contains_key("icon"));
}

#[tokio::test]
async fn photo_roundtrip_views_and_deletes() {
    let (store, _temp) = test_store();
    let circle_id = "circle_photos";
    let astrid_photos = PhotoService::new(&store, senior("Astrid"), Some(circle_id));
    let bjorn_photos = PhotoService::new(&store, relative("Bjorn"), Some(circle_id));

    let photo_id = bjorn_photos
        .upload_photo(SAMPLE_PNG, "Bjorn")
        .await
        .expect("upload");
    assert!(!bjorn_photos.uploading());

    wait_until("photo surfaced for Astrid", || {
        astrid_photos.latest().is_some()
    })
    .await;
    let photo = astrid_photos.latest().expect("latest photo");
    assert_eq!(photo.doc_id, photo_id);
    assert_eq!(photo.mime.as_deref(), Some("image/png"));
    assert!(photo
        .checksum
        .as_deref()
        .map(|c| c.starts_with("blake3:"))
        .unwrap_or(false));
    // The uploader never sees their own photo as unviewed-for-me.
    assert!(bjorn_photos.latest().is_none());

    astrid_photos.mark_viewed(&photo.doc_id);
    wait_until("viewed marker mirrored", || astrid_photos.latest().is_none()).await;

    astrid_photos
        .delete_photo(&photo.doc_id, Some(&photo.storage_path))
        .await
        .expect("delete");
    wait_until("photo gone", || astrid_photos.photos().is_empty()).await;
    assert!(!store.blobs().exists(&photo.storage_path).await);
}

#[tokio::test]
async fn check_in_is_visible_to_the_other_member() {
    let (store, _temp) = test_store();
    let circle_id = "circle_checkin";
    let astrid_check_in = CheckInService::new(&store, Some(circle_id));
    let bjorn_check_in = CheckInService::new(&store, Some(circle_id));

    assert!(bjorn_check_in.last_check_in().is_none());
    astrid_check_in.record_check_in();
    wait_until("check-in mirrored", || {
        bjorn_check_in.last_check_in().is_some()
    })
    .await;
    assert!(bjorn_check_in.last_check_in_label().is_some());
}

#[tokio::test]
async fn offline_profile_fetch_retries_with_backoff_then_errors() {
    let (store, _temp) = test_store();
    let profiles = UserProfileService::new(store.clone());
    store.shutdown();

    let started = Instant::now();
    let err = profiles.fetch_profile("user_astrid").await.unwrap_err();
    assert_eq!(err, SyncError::Offline);
    // Three attempts with 500ms then 1000ms between them.
    assert!(started.elapsed() >= Duration::from_millis(1400));
    assert!(profiles.errors().current().is_some());
}

#[tokio::test]
async fn leaving_the_circle_removes_the_membership() {
    let (store, _temp) = test_store();
    let astrid = senior("Astrid");
    let bjorn = relative("Bjorn");

    let mut astrid_circle = CareCircleService::new(store.clone(), astrid);
    let circle_id = astrid_circle.create_circle("Astrid").expect("create");
    let code = astrid_circle.invite_code().expect("code").to_string();

    let mut bjorn_circle = CareCircleService::new(store.clone(), bjorn.clone());
    bjorn_circle.join_circle(&code, "Bjorn", None).expect("join");
    wait_until("two members", || astrid_circle.members().len() == 2).await;

    bjorn_circle.leave_circle().expect("leave");
    assert_eq!(bjorn_circle.phase(), SetupPhase::NoCircle);
    assert!(!bjorn_circle.has_circle());
    wait_until("one member left", || astrid_circle.members().len() == 1).await;

    let gone = store
        .get("memberships", &format!("{circle_id}_{}", bjorn.user_id))
        .expect("read membership");
    assert!(gone.is_none());
}
