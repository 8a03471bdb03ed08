//! Integration tests for the store layer.
//!
//! Run against an in-memory SQLite database with the real migrations
//! applied, so these exercise the actual schema including foreign-key
//! cascades and unique indexes.

use chrono::{Duration, Utc};
use tempo_core::scripting::status::{STATUS_FAILED, STATUS_RUNNING, STATUS_SUCCESS};
use tempo_db::models::execution::{ExecutionFilter, FinalizeExecution};
use tempo_db::models::folder::CreateFolder;
use tempo_db::models::script::{CreateScript, UpdateScript};
use tempo_db::models::trigger::CreateTrigger;
use tempo_db::repositories::{ExecutionRepo, FolderRepo, ScriptRepo, SettingsRepo, TriggerRepo};
use tempo_db::DbPool;

async fn test_pool() -> DbPool {
    let pool = tempo_db::create_memory_pool().await.expect("memory pool");
    tempo_db::run_migrations(&pool).await.expect("migrations");
    pool
}

fn demo_script(name: &str) -> CreateScript {
    CreateScript {
        name: name.to_string(),
        description: String::new(),
        content: "print(\"hello\")\n".to_string(),
        folder_id: None,
        python_version: "3.12".to_string(),
        requirements: String::new(),
        environment: Default::default(),
        email_on_completion: false,
        email_recipients: String::new(),
        email_trigger: "all".to_string(),
        auto_save: true,
        timeout_secs: None,
    }
}

async fn create_script(pool: &DbPool, name: &str) -> tempo_db::models::script::Script {
    let input = demo_script(name);
    let slug = ScriptRepo::ensure_unique_slug(pool, name, None, None)
        .await
        .expect("slug");
    ScriptRepo::create(pool, &input, &slug).await.expect("create")
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn script_round_trip_preserves_fields() {
    let pool = test_pool().await;

    let mut input = demo_script("Hello World");
    input
        .environment
        .insert("API_KEY".to_string(), "secret".to_string());
    input.requirements = "requests==2.31.0\n".to_string();

    let slug = ScriptRepo::ensure_unique_slug(&pool, &input.name, None, None)
        .await
        .unwrap();
    assert_eq!(slug, "hello-world");

    let created = ScriptRepo::create(&pool, &input, &slug).await.unwrap();
    let loaded = ScriptRepo::find_by_slug(&pool, "hello-world")
        .await
        .unwrap()
        .expect("script exists");

    assert_eq!(loaded.id, created.id);
    assert_eq!(loaded.name, "Hello World");
    assert_eq!(loaded.slug, "hello-world");
    assert_eq!(loaded.content, "print(\"hello\")\n");
    assert_eq!(loaded.requirements, "requests==2.31.0\n");
    assert_eq!(loaded.environment().get("API_KEY").unwrap(), "secret");
    assert_eq!(loaded.run_total, 0);
    assert_eq!(loaded.run_success, 0);
    assert!(loaded.enabled);
    assert!(loaded.last_run_at.is_none());
}

#[tokio::test]
async fn slug_collisions_get_numeric_suffixes() {
    let pool = test_pool().await;

    create_script(&pool, "Report").await;

    // Distinct display names that slugify identically.
    let input = demo_script("report");
    let slug = ScriptRepo::ensure_unique_slug(&pool, "report", None, None)
        .await
        .unwrap();
    assert_eq!(slug, "report-2");
    ScriptRepo::create(&pool, &input, &slug).await.unwrap();

    let slug = ScriptRepo::ensure_unique_slug(&pool, "REPORT", None, None)
        .await
        .unwrap();
    assert_eq!(slug, "report-3");
}

#[tokio::test]
async fn same_slug_allowed_in_different_folders() {
    let pool = test_pool().await;

    let folder = FolderRepo::create(
        &pool,
        &CreateFolder {
            name: "reports".to_string(),
            parent_id: None,
        },
    )
    .await
    .unwrap();

    create_script(&pool, "Daily").await;

    let slug = ScriptRepo::ensure_unique_slug(&pool, "Daily", Some(folder.id), None)
        .await
        .unwrap();
    assert_eq!(slug, "daily");
}

#[tokio::test]
async fn update_applies_only_set_fields() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Original").await;

    let update = UpdateScript {
        description: Some("updated".to_string()),
        enabled: Some(false),
        ..Default::default()
    };
    let updated = ScriptRepo::update(&pool, script.id, &update, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.name, "Original");
    assert_eq!(updated.description, "updated");
    assert!(!updated.enabled);
    assert_eq!(updated.content, script.content);
}

#[tokio::test]
async fn auto_save_honors_flag() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Draft").await;

    assert!(ScriptRepo::auto_save_content(&pool, &script.slug, "print(1)\n")
        .await
        .unwrap());

    let update = UpdateScript {
        auto_save: Some(false),
        ..Default::default()
    };
    ScriptRepo::update(&pool, script.id, &update, None)
        .await
        .unwrap();

    assert!(!ScriptRepo::auto_save_content(&pool, &script.slug, "print(2)\n")
        .await
        .unwrap());

    let loaded = ScriptRepo::find_by_id(&pool, script.id).await.unwrap().unwrap();
    assert_eq!(loaded.content, "print(1)\n");
}

#[tokio::test]
async fn counters_follow_run_outcomes() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Counted").await;

    ScriptRepo::record_run_result(&pool, script.id, true, Utc::now())
        .await
        .unwrap();
    ScriptRepo::record_run_result(&pool, script.id, false, Utc::now())
        .await
        .unwrap();

    let loaded = ScriptRepo::find_by_id(&pool, script.id).await.unwrap().unwrap();
    assert_eq!(loaded.run_total, 2);
    assert_eq!(loaded.run_success, 1);
    assert!(loaded.last_run_at.is_some());
}

// ---------------------------------------------------------------------------
// Execution lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn at_most_one_running_record_per_script() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Busy").await;

    let first = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap();
    assert!(first.is_some());

    // Second claim must be rejected while the first is running.
    let second = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap();
    assert!(second.is_none());

    // A different script is unaffected.
    let other = create_script(&pool, "Other").await;
    assert!(ExecutionRepo::try_start(&pool, other.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .is_some());
}

fn finalize_with(status: &'static str, exit_code: Option<i64>) -> FinalizeExecution {
    FinalizeExecution {
        status,
        exit_code,
        stdout: "hello\n".to_string(),
        stderr: String::new(),
        stdout_truncated: false,
        stderr_truncated: false,
        finished_at: Utc::now(),
        duration_ms: 12,
    }
}

#[tokio::test]
async fn finalize_is_write_once() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Once").await;

    let id = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .unwrap();

    assert!(ExecutionRepo::finalize(&pool, id, &finalize_with(STATUS_SUCCESS, Some(0)))
        .await
        .unwrap());

    // A second finalize must not touch the terminal record.
    assert!(!ExecutionRepo::finalize(&pool, id, &finalize_with(STATUS_FAILED, Some(1)))
        .await
        .unwrap());

    let record = ExecutionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(record.status, STATUS_SUCCESS);
    assert_eq!(record.exit_code, Some(0));
    assert!(record.finished_at.is_some());
    assert!(record.finished_at.unwrap() >= record.started_at);
}

#[tokio::test]
async fn running_slot_frees_after_finalize() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Serial").await;

    let id = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .unwrap();
    ExecutionRepo::finalize(&pool, id, &finalize_with(STATUS_SUCCESS, Some(0)))
        .await
        .unwrap();

    assert!(ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn list_filters_compose() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Filtered").await;
    let other = create_script(&pool, "Unrelated").await;

    let id = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .unwrap();
    let mut outcome = finalize_with(STATUS_SUCCESS, Some(0));
    outcome.stdout = "the needle is here\n".to_string();
    ExecutionRepo::finalize(&pool, id, &outcome).await.unwrap();

    let other_id = ExecutionRepo::try_start(&pool, other.id, None, "schedule", Utc::now())
        .await
        .unwrap()
        .unwrap();
    ExecutionRepo::finalize(&pool, other_id, &finalize_with(STATUS_FAILED, Some(1)))
        .await
        .unwrap();

    // By script.
    let records = ExecutionRepo::list(
        &pool,
        &ExecutionFilter {
            script_id: Some(script.id),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].script_name, "Filtered");

    // By status.
    let records = ExecutionRepo::list(
        &pool,
        &ExecutionFilter {
            status: Some(STATUS_FAILED.to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].script_id, other.id);

    // Free-text search over captured output.
    let records = ExecutionRepo::list(
        &pool,
        &ExecutionFilter {
            search: Some("needle".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].script_id, script.id);

    // A window excluding everything.
    let records = ExecutionRepo::list(
        &pool,
        &ExecutionFilter {
            date_to: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn reap_abandoned_rewrites_stale_running_records() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Crashed").await;

    // A run that started well before the grace window.
    let stale_start = Utc::now() - Duration::minutes(30);
    let stale = ExecutionRepo::try_start(&pool, script.id, None, "schedule", stale_start)
        .await
        .unwrap()
        .unwrap();

    let cutoff = Utc::now() - Duration::minutes(5);
    let reaped = ExecutionRepo::reap_abandoned(&pool, cutoff).await.unwrap();
    assert_eq!(reaped, 1);

    let record = ExecutionRepo::find_by_id(&pool, stale).await.unwrap().unwrap();
    assert_eq!(record.status, STATUS_FAILED);
    assert_eq!(record.stderr.as_deref(), Some("abandoned on restart"));
    assert!(record.finished_at.is_some());
    // ~30 minutes in milliseconds, allowing slack for test runtime.
    let duration = record.duration_ms.unwrap();
    assert!((1_700_000..1_900_000).contains(&duration), "duration {duration}");
}

#[tokio::test]
async fn fresh_running_records_survive_reaping() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Live").await;

    let id = ExecutionRepo::try_start(&pool, script.id, None, "manual", Utc::now())
        .await
        .unwrap()
        .unwrap();

    let cutoff = Utc::now() - Duration::minutes(5);
    assert_eq!(ExecutionRepo::reap_abandoned(&pool, cutoff).await.unwrap(), 0);

    let record = ExecutionRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(record.status, STATUS_RUNNING);
}

#[tokio::test]
async fn retention_keeps_newest_per_script() {
    let pool = test_pool().await;
    let script = create_script(&pool, "History").await;

    for i in 0..5i64 {
        let started = Utc::now() - Duration::minutes(10 - i);
        let id = ExecutionRepo::try_start(&pool, script.id, None, "schedule", started)
            .await
            .unwrap()
            .unwrap();
        ExecutionRepo::finalize(&pool, id, &finalize_with(STATUS_SUCCESS, Some(0)))
            .await
            .unwrap();
    }

    let deleted = ExecutionRepo::retain_newest_per_script(&pool, 2).await.unwrap();
    assert_eq!(deleted, 3);

    let remaining = ExecutionRepo::list(&pool, &ExecutionFilter::default()).await.unwrap();
    assert_eq!(remaining.len(), 2);
}

#[tokio::test]
async fn age_based_cleanup_deletes_old_records() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Aged").await;

    let old = ExecutionRepo::try_start(
        &pool,
        script.id,
        None,
        "schedule",
        Utc::now() - Duration::days(60),
    )
    .await
    .unwrap()
    .unwrap();
    ExecutionRepo::finalize(&pool, old, &finalize_with(STATUS_SUCCESS, Some(0)))
        .await
        .unwrap();

    let recent = ExecutionRepo::try_start(&pool, script.id, None, "schedule", Utc::now())
        .await
        .unwrap()
        .unwrap();
    ExecutionRepo::finalize(&pool, recent, &finalize_with(STATUS_SUCCESS, Some(0)))
        .await
        .unwrap();

    let deleted = ExecutionRepo::delete_older_than(&pool, Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(ExecutionRepo::find_by_id(&pool, old).await.unwrap().is_none());
    assert!(ExecutionRepo::find_by_id(&pool, recent).await.unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Cascades
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleting_a_script_cascades_to_triggers_and_logs() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Doomed").await;

    let trigger = TriggerRepo::create(
        &pool,
        &CreateTrigger {
            script_id: script.id,
            kind: "interval".to_string(),
            config: serde_json::json!({"seconds": 60}),
            enabled: true,
        },
        Some(Utc::now()),
    )
    .await
    .unwrap();

    let run = ExecutionRepo::try_start(&pool, script.id, Some(trigger.id), "schedule", Utc::now())
        .await
        .unwrap()
        .unwrap();
    ExecutionRepo::finalize(&pool, run, &finalize_with(STATUS_SUCCESS, Some(0)))
        .await
        .unwrap();

    assert!(ScriptRepo::delete(&pool, script.id).await.unwrap());

    assert!(TriggerRepo::find_by_id(&pool, trigger.id).await.unwrap().is_none());
    assert!(ExecutionRepo::find_by_id(&pool, run).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_a_folder_cascades_to_scripts() {
    let pool = test_pool().await;

    let folder = FolderRepo::create(
        &pool,
        &CreateFolder {
            name: "doomed".to_string(),
            parent_id: None,
        },
    )
    .await
    .unwrap();

    let mut input = demo_script("Inside");
    input.folder_id = Some(folder.id);
    let slug = ScriptRepo::ensure_unique_slug(&pool, "Inside", Some(folder.id), None)
        .await
        .unwrap();
    let script = ScriptRepo::create(&pool, &input, &slug).await.unwrap();

    assert!(FolderRepo::delete(&pool, folder.id).await.unwrap());
    assert!(ScriptRepo::find_by_id(&pool, script.id).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_fire_state_advances_atomically() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Timed").await;

    let trigger = TriggerRepo::create(
        &pool,
        &CreateTrigger {
            script_id: script.id,
            kind: "interval".to_string(),
            config: serde_json::json!({"seconds": 2}),
            enabled: true,
        },
        None,
    )
    .await
    .unwrap();
    assert!(trigger.last_fired_at.is_none());

    let fired = Utc::now();
    let next = fired + Duration::seconds(2);
    TriggerRepo::record_fire(&pool, trigger.id, fired, Some(next))
        .await
        .unwrap();

    let loaded = TriggerRepo::find_by_id(&pool, trigger.id).await.unwrap().unwrap();
    let last = loaded.last_fired_at.unwrap();
    let armed = loaded.next_fire_at.unwrap();
    assert!(armed > last);
}

#[tokio::test]
async fn armable_listing_respects_script_enabled_flag() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Paused").await;

    TriggerRepo::create(
        &pool,
        &CreateTrigger {
            script_id: script.id,
            kind: "interval".to_string(),
            config: serde_json::json!({"seconds": 60}),
            enabled: true,
        },
        Some(Utc::now()),
    )
    .await
    .unwrap();

    assert_eq!(TriggerRepo::list_armable(&pool).await.unwrap().len(), 1);

    // Disabling the script pauses its triggers.
    ScriptRepo::update(
        &pool,
        script.id,
        &UpdateScript {
            enabled: Some(false),
            ..Default::default()
        },
        None,
    )
    .await
    .unwrap();

    assert!(TriggerRepo::list_armable(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn toggle_flips_enabled() {
    let pool = test_pool().await;
    let script = create_script(&pool, "Toggled").await;

    let trigger = TriggerRepo::create(
        &pool,
        &CreateTrigger {
            script_id: script.id,
            kind: "manual".to_string(),
            config: serde_json::json!({}),
            enabled: true,
        },
        None,
    )
    .await
    .unwrap();

    assert_eq!(TriggerRepo::toggle(&pool, trigger.id).await.unwrap(), Some(false));
    assert_eq!(TriggerRepo::toggle(&pool, trigger.id).await.unwrap(), Some(true));
    assert_eq!(TriggerRepo::toggle(&pool, 9999).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn settings_seed_is_idempotent_and_preserves_edits() {
    let pool = test_pool().await;

    SettingsRepo::seed_defaults(&pool, "first-key").await.unwrap();
    assert_eq!(
        SettingsRepo::get(&pool, "api_key").await.unwrap().as_deref(),
        Some("first-key")
    );

    SettingsRepo::set(&pool, "api_key", "operator-edited").await.unwrap();
    SettingsRepo::seed_defaults(&pool, "second-key").await.unwrap();

    assert_eq!(
        SettingsRepo::get(&pool, "api_key").await.unwrap().as_deref(),
        Some("operator-edited")
    );
    assert_eq!(
        SettingsRepo::get_i64_or(&pool, "default_script_timeout", 60)
            .await
            .unwrap(),
        300
    );
    assert_eq!(
        SettingsRepo::get_i64_or(&pool, "missing_key", 42).await.unwrap(),
        42
    );
}
