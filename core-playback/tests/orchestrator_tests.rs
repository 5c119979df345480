//! End-to-end session tests against scripted HTTP and a temp filesystem.

mod common;

use common::{next_command, test_config, Harness, API, VIDEO_BYTES};
use core_playback::asset::{QualityMode, Rendition};
use core_playback::error::{PlaybackError, TranslationError, VaultError};
use core_playback::orchestrator::{DownloadStart, PlaybackOrchestrator, PlayerCommand, PlayerEvent};
use core_playback::progress::{PersistedProgress, PlaybackStatus};
use core_playback::session::SessionState;
use core_runtime::events::{CoreEvent, DownloadEvent, PlaybackEvent, Receiver};
use std::sync::atomic::Ordering;
use std::time::Duration;

const P240: &str = "https://lessons.test/uploads/video123_240.mp4";
const P720: &str = "https://lessons.test/uploads/video123_720.mp4";

fn playing(position_ms: u64) -> PlayerEvent {
    PlayerEvent::Status(PlaybackStatus {
        position_ms,
        duration_ms: Some(100_000),
        is_playing: true,
        did_just_finish: false,
    })
}

async fn wait_for_state(session: &PlaybackOrchestrator, wanted: SessionState) {
    let mut changes = session.state_changes();
    tokio::time::timeout(Duration::from_secs(1), changes.wait_for(|s| *s == wanted))
        .await
        .expect("state reached")
        .expect("session alive");
}

async fn wait_for_download(mut rx: Receiver<CoreEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(CoreEvent::Download(event @ DownloadEvent::Completed { .. }))
                | Ok(CoreEvent::Download(event @ DownloadEvent::Failed { .. })) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await
    .expect("download finished")
}

#[tokio::test]
async fn test_open_without_sample_loads_lowest_tier() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();

    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Load { uri: P240.to_string() }
    );
    assert_eq!(session.state(), SessionState::Loading);
    assert_eq!(session.quality(), QualityMode::Auto);
    assert_eq!(session.asset().title, "Fractions");

    let events = session.player_events();
    events.send(PlayerEvent::Ready).unwrap();
    events.send(playing(300)).unwrap();
    wait_for_state(&session, SessionState::Playing).await;

    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_resume_seeks_to_saved_position() {
    let harness = Harness::new();
    harness
        .ctx
        .progress
        .put("video123", PersistedProgress::new(20, 100, 42_000))
        .await
        .unwrap();

    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    session.player_events().send(PlayerEvent::Ready).unwrap();
    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Seek { position_ms: 42_000 }
    );
    session.close().await;
}

#[tokio::test]
async fn test_quality_switch_resumes_at_live_position() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    let events = session.player_events();
    events.send(PlayerEvent::Ready).unwrap();
    events.send(playing(300)).unwrap();
    events.send(playing(600)).unwrap();
    wait_for_state(&session, SessionState::Playing).await;

    session.set_quality(QualityMode::Fixed(Rendition::P720)).unwrap();
    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Load { uri: P720.to_string() }
    );
    assert_eq!(
        session.state(),
        SessionState::Switching { resume_at_ms: 600 }
    );

    events.send(PlayerEvent::Ready).unwrap();
    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Seek { position_ms: 600 }
    );
    assert_eq!(next_command(&mut commands).await, PlayerCommand::Play);
    session.close().await;
}

#[tokio::test]
async fn test_manual_saver_forces_lowest_tier_and_locks_quality() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    session.set_quality(QualityMode::Fixed(Rendition::P720)).unwrap();
    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Load { uri: P720.to_string() }
    );

    assert!(session.set_manual_saver(true));
    assert_eq!(
        next_command(&mut commands).await,
        PlayerCommand::Load { uri: P240.to_string() }
    );
    assert!(matches!(
        session.set_quality(QualityMode::Fixed(Rendition::P360)),
        Err(PlaybackError::QualityLocked)
    ));
    assert!(!harness.ctx.estimator.is_active());
    session.close().await;
}

#[tokio::test]
async fn test_inactivity_pauses_and_activity_resumes() {
    let mut config = test_config();
    config.session.inactivity_timeout = Some(Duration::from_millis(200));
    let harness = Harness::with_config(config);
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;
    let mut lesson = session.lesson_events();

    let events = session.player_events();
    events.send(PlayerEvent::Ready).unwrap();
    events.send(playing(300)).unwrap();

    assert_eq!(next_command(&mut commands).await, PlayerCommand::Pause);
    wait_for_state(&session, SessionState::Idle).await;
    let idle = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(CoreEvent::Playback(event @ PlaybackEvent::Idle { .. })) = lesson.recv().await {
                return event;
            }
        }
    })
    .await
    .expect("idle event");
    assert_eq!(idle, PlaybackEvent::Idle { video_id: "video123".to_string() });

    session.user_activity();
    assert_eq!(next_command(&mut commands).await, PlayerCommand::Play);
    wait_for_state(&session, SessionState::Playing).await;
    session.close().await;
}

#[tokio::test]
async fn test_close_flushes_progress_and_rejects_changes() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    let events = session.player_events();
    events.send(PlayerEvent::Ready).unwrap();
    for i in 1..=7u64 {
        events.send(playing(i * 300)).unwrap();
    }
    session.close().await;
    session.close().await;

    let saved = session.saved_progress().await.unwrap().unwrap();
    assert_eq!(saved.watched_seconds, 2);
    assert_eq!(saved.last_position, 2_100);
    assert!(matches!(
        session.set_quality(QualityMode::Auto),
        Err(PlaybackError::SessionClosed)
    ));
}

#[tokio::test]
async fn test_download_then_play_from_vault() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    let finished = tokio::spawn(wait_for_download(harness.ctx.events.subscribe()));

    match session.start_download().await.unwrap() {
        DownloadStart::Started(_) => {}
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(finished.await.unwrap(), DownloadEvent::Completed { .. }));
    assert!(matches!(
        session.start_download().await.unwrap(),
        DownloadStart::AlreadyDownloaded(_)
    ));
    session.close().await;

    let record = harness.ctx.library.get("video123").await.unwrap().unwrap();
    assert_eq!(record.size_bytes, VIDEO_BYTES.len() as u64);
    assert!(record.local_uri.ends_with("video123.dat"));

    // Reopened, the lesson plays from a temporary copy of the vault file.
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    let PlayerCommand::Load { uri } = next_command(&mut commands).await else {
        panic!("expected load");
    };
    assert!(uri.ends_with(".mp4"));
    assert!(uri.contains("playback"));
    assert_eq!(std::fs::read(&uri).unwrap(), VIDEO_BYTES);
    assert!(!harness.ctx.estimator.is_active());

    let shared = session.share_copy().await.unwrap();
    assert_eq!(std::fs::read(shared.path()).unwrap(), VIDEO_BYTES);
    shared.release().await.unwrap();

    session.close().await;
    assert!(!std::path::Path::new(&uri).exists());
}

#[tokio::test]
async fn test_removed_download_is_missing_from_vault() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    let finished = tokio::spawn(wait_for_download(harness.ctx.events.subscribe()));
    session.start_download().await.unwrap();
    finished.await.unwrap();

    let record = session.remove_download().await.unwrap();
    let err = harness
        .ctx
        .vault
        .materialize(&record.vault_path())
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::MissingAsset(_)));

    assert!(matches!(
        session.remove_download().await,
        Err(PlaybackError::NotDownloaded(_))
    ));
    assert!(matches!(
        session.share_copy().await,
        Err(PlaybackError::NotDownloaded(_))
    ));
    session.close().await;
}

#[tokio::test]
async fn test_rejected_download_leaves_no_record() {
    let harness = Harness::new();
    harness
        .http
        .route("https://lessons.test/uploads/video123.mp4", 403, "");
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    let finished = tokio::spawn(wait_for_download(harness.ctx.events.subscribe()));
    session.start_download().await.unwrap();

    match finished.await.unwrap() {
        DownloadEvent::Failed { message, .. } => {
            assert_eq!(message, "The video could not be downloaded. Please try again later.")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(harness.ctx.library.list().await.unwrap().is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_offline_translation_never_falls_back_to_english() {
    let harness = Harness::new();
    let (session, mut commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut commands).await;

    // English is cached in the background when the session opens.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !harness
            .ctx
            .translations
            .cache()
            .has("video123", "en")
            .await
            .unwrap()
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let english = session.translation("en", true).await.unwrap();
    assert_eq!(english.text, "Hello learners");

    let err = session.translation("hi", true).await.unwrap_err();
    assert!(matches!(
        err,
        PlaybackError::Translation(TranslationError::NotCachedOffline { .. })
    ));
    assert_eq!(err.user_message(), "This translation is not available offline.");

    let hindi = session.translation("hi", false).await.unwrap();
    assert_eq!(hindi.text, "Namaste");
    assert!(!hindi.from_cache);
    session.close().await;
}

#[tokio::test]
async fn test_offline_without_download_cannot_open() {
    let harness = Harness::new();
    harness.http.offline.store(true, Ordering::SeqCst);

    let result = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_closing_one_session_keeps_probing_for_another() {
    let harness = Harness::new();
    let (first, mut first_commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    let (second, mut second_commands) = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "video123")
        .await
        .unwrap();
    next_command(&mut first_commands).await;
    next_command(&mut second_commands).await;
    assert!(harness.ctx.estimator.is_active());

    first.close().await;
    assert!(harness.ctx.estimator.is_active());

    second.close().await;
    assert!(!harness.ctx.estimator.is_active());
}

#[tokio::test]
async fn test_unplayable_lesson_does_not_start_probing() {
    let harness = Harness::new();
    harness.http.route(
        &format!("{}/videos/course/c1/silent", API),
        200,
        serde_json::json!({ "title": "No media yet" }).to_string(),
    );

    let result = PlaybackOrchestrator::open(harness.ctx.clone(), "c1", "silent").await;
    assert!(matches!(result, Err(PlaybackError::AssetUnavailable(_))));
    assert!(!harness.ctx.estimator.is_active());
}
