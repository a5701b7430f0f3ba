use crate::circle::CareCircleService;
use crate::config::KinringConfig;
use crate::models::{object, Role, UserIdentity};
use crate::services::check_in::CheckInService;
use crate::services::help_exchange::HelpExchangeService;
use crate::services::member_status::MemberStatusService;
use crate::services::photos::PhotoService;
use crate::services::pings::PingService;
use crate::services::profile::UserProfileService;
use crate::services::symptoms::SymptomService;
use anyhow::{Context, Result};
use kinring_backend::Store;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

// Smallest valid PNG (1x1 transparent pixel); stands in for a camera shot.
const SAMPLE_PHOTO: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x62, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// Scripted two-actor walkthrough: a senior creates a circle, a relative
/// joins by code, and the pair exchange statuses, pings, symptoms, help
/// items, a photo, and a check-in through the live mirrors.
pub async fn run_demo(config: KinringConfig) -> Result<()> {
    let store = Store::open(&config.paths)?;

    let astrid = UserIdentity {
        user_id: Uuid::new_v4().to_string(),
        display_name: "Astrid".to_string(),
        role: Role::Senior,
    };
    let bjorn = UserIdentity {
        user_id: Uuid::new_v4().to_string(),
        display_name: "Bjorn".to_string(),
        role: Role::Relative,
    };

    let profiles = UserProfileService::new(store.clone());
    profiles.create_profile(&astrid.user_id, &astrid.display_name, astrid.role)?;
    profiles.create_profile(&bjorn.user_id, &bjorn.display_name, bjorn.role)?;

    println!("== circle setup ==");
    let mut astrid_circle = CareCircleService::new(store.clone(), astrid.clone());
    let circle_id = astrid_circle.create_circle(&astrid.display_name)?;
    let code = astrid_circle
        .invite_code()
        .context("freshly created circle has an invite code")?
        .to_string();
    println!("Astrid created circle {circle_id} with invite code {code}");

    let mut bjorn_circle = CareCircleService::new(store.clone(), bjorn.clone());
    // Codes are case-insensitive on entry.
    bjorn_circle.join_circle(&code.to_lowercase(), &bjorn.display_name, Some("son"))?;
    settle().await;
    println!("Bjorn joined; members as Bjorn sees them:");
    for member in bjorn_circle.members() {
        println!("  - {} ({})", member.display_name, member.role);
    }

    println!("== member status ==");
    let astrid_status = MemberStatusService::new(&store, astrid.clone(), Some(&circle_id));
    let bjorn_status = MemberStatusService::new(&store, bjorn.clone(), Some(&circle_id));
    astrid_status.set_my_status("home");
    bjorn_status.set_my_status("work");
    settle().await;
    if let Some(senior) = bjorn_status.senior_status() {
        println!("Bjorn sees {}: {}", senior.display_name, senior.status);
    }
    for relative in astrid_status.relative_statuses() {
        println!("Astrid sees {}: {}", relative.display_name, relative.status);
    }

    println!("== thinking of you ==");
    let astrid_pings = PingService::new(&store, astrid.clone(), Some(&circle_id));
    let bjorn_pings = PingService::new(&store, bjorn.clone(), Some(&circle_id));
    bjorn_pings.send_ping(Role::Senior);
    settle().await;
    if let Some(ping) = astrid_pings.latest() {
        println!("Astrid got a ping from {}", ping.from_name);
        astrid_pings.dismiss();
    }

    println!("== symptom log ==");
    let symptoms = SymptomService::new(&store, Some(&circle_id));
    symptoms.add_symptom(object(json!({
        "id": "dizziness",
        "label": "Dizziness",
        "intensity": 3,
    })));
    settle().await;
    for (kind, stat) in symptoms.stats() {
        println!("  {kind}: {} entries, last on {:?}", stat.count, stat.last_occurrence);
    }

    println!("== help exchange ==");
    let astrid_help = HelpExchangeService::new(&store, astrid.clone(), Some(&circle_id));
    let bjorn_help = HelpExchangeService::new(&store, bjorn.clone(), Some(&circle_id));
    astrid_help.add_request(object(json!({
        "id": "groceries",
        "label": "Groceries",
        "emoji": "🛒",
    })));
    bjorn_help.add_offer(object(json!({
        "id": "groceries",
        "label": "Groceries",
        "emoji": "🛒",
    })));
    settle().await;
    if let Some(m) = astrid_help.top_match(&astrid_status.statuses()) {
        println!("Match! {}", m.celebration);
    }

    println!("== daily photo ==");
    let astrid_photos = PhotoService::new(&store, astrid.clone(), Some(&circle_id));
    let bjorn_photos = PhotoService::new(&store, bjorn.clone(), Some(&circle_id));
    bjorn_photos
        .upload_photo(SAMPLE_PHOTO, &bjorn.display_name)
        .await?;
    settle().await;
    if let Some(photo) = astrid_photos.latest() {
        println!(
            "Astrid received a photo from {} ({})",
            photo.from_name,
            photo.mime.as_deref().unwrap_or("unknown type")
        );
        astrid_photos.mark_viewed(&photo.doc_id);
        settle().await;
        astrid_photos
            .delete_photo(&photo.doc_id, Some(&photo.storage_path))
            .await?;
        println!("...viewed and deleted");
    }

    println!("== check-in ==");
    let astrid_check_in = CheckInService::new(&store, Some(&circle_id));
    let bjorn_check_in = CheckInService::new(&store, Some(&circle_id));
    astrid_check_in.record_check_in();
    settle().await;
    if let Some(label) = bjorn_check_in.last_check_in_label() {
        println!("Bjorn sees Astrid checked in at {label}");
    }

    println!("Demo complete.");
    Ok(())
}

/// Dumps a collection from the local store.
pub fn run_inspect(config: KinringConfig, collection: &str) -> Result<()> {
    let store = Store::open(&config.paths)?;
    let documents = store.list_all(collection)?;
    if documents.is_empty() {
        println!("(no documents in {collection})");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{}  @{}\n{}",
            doc.id,
            doc.write_time,
            serde_json::to_string_pretty(&doc.fields)?
        );
    }
    Ok(())
}

/// Fire-and-forget writes and mirror updates land on the next scheduler
/// ticks; give them a beat before reading.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
