// FlowState - Audio Output Integration Tests
//
// Exercises the audio stimulus adapter against recording players:
// 1. Operation serialization and initialization
// 2. Kill-switch watchdog
// 3. Observers and disposal

use async_trait::async_trait;
use flowstate::stimulus::{PlayerCall, StimulusCallback};
use flowstate::{
    AudioConfig, AudioOutput, InstanceId, LoggingPlayer, PlaybackStatus, Player,
    StimulusError, StimulusOutput, StimulusState, ToneBuffer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

// ============================================================================
// Test players
// ============================================================================

/// Player whose operations take time, logging when each starts and ends
struct SlowPlayer {
    inner: LoggingPlayer,
    delay: Duration,
    log: Mutex<Vec<&'static str>>,
    inits: AtomicUsize,
}

impl SlowPlayer {
    fn new(delay: Duration) -> Self {
        Self {
            inner: LoggingPlayer::new(InstanceId::new(10)),
            delay,
            log: Mutex::new(Vec::new()),
            inits: AtomicUsize::new(0),
        }
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    fn current_playing(&self) -> bool {
        self.inner.current().is_playing
    }

    async fn timed(&self, start: &'static str, end: &'static str) {
        self.log.lock().unwrap().push(start);
        sleep(self.delay).await;
        self.log.lock().unwrap().push(end);
    }
}

#[async_trait]
impl Player for SlowPlayer {
    async fn initialize(&self) -> Result<(), StimulusError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;
        self.inner.initialize().await
    }

    async fn load(&self, tone: &ToneBuffer) -> Result<(), StimulusError> {
        self.inner.load(tone).await
    }

    async fn play(&self) -> Result<(), StimulusError> {
        self.timed("play:start", "play:end").await;
        self.inner.play().await
    }

    async fn pause(&self) -> Result<(), StimulusError> {
        self.timed("pause:start", "pause:end").await;
        self.inner.pause().await
    }

    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError> {
        self.inner.set_volume(volume).await
    }

    async fn seek_to_start(&self) -> Result<(), StimulusError> {
        self.inner.seek_to_start().await
    }

    async fn unload(&self) -> Result<(), StimulusError> {
        self.inner.unload().await
    }

    fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.inner.status()
    }
}

/// Player that refuses to start
struct BrokenPlayer {
    inner: LoggingPlayer,
}

#[async_trait]
impl Player for BrokenPlayer {
    async fn initialize(&self) -> Result<(), StimulusError> {
        self.inner.initialize().await
    }

    async fn load(&self, tone: &ToneBuffer) -> Result<(), StimulusError> {
        self.inner.load(tone).await
    }

    async fn play(&self) -> Result<(), StimulusError> {
        Err(StimulusError::Actuator("audio session interrupted".to_string()))
    }

    async fn pause(&self) -> Result<(), StimulusError> {
        self.inner.pause().await
    }

    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError> {
        self.inner.set_volume(volume).await
    }

    async fn seek_to_start(&self) -> Result<(), StimulusError> {
        self.inner.seek_to_start().await
    }

    async fn unload(&self) -> Result<(), StimulusError> {
        self.inner.unload().await
    }

    fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.inner.status()
    }
}

fn logging_output() -> (Arc<LoggingPlayer>, AudioOutput<LoggingPlayer>) {
    let player = Arc::new(LoggingPlayer::new(InstanceId::new(1)));
    let output = AudioOutput::new(InstanceId::new(2), AudioConfig::default(), player.clone());
    (player, output)
}

const RUNAWAY: PlaybackStatus = PlaybackStatus {
    is_loaded: true,
    is_playing: true,
};

/// Player whose pause is acknowledged but has no effect
struct StuckPlayer {
    inner: LoggingPlayer,
    pauses: AtomicUsize,
}

#[async_trait]
impl Player for StuckPlayer {
    async fn initialize(&self) -> Result<(), StimulusError> {
        self.inner.initialize().await
    }

    async fn load(&self, tone: &ToneBuffer) -> Result<(), StimulusError> {
        self.inner.load(tone).await
    }

    async fn play(&self) -> Result<(), StimulusError> {
        self.inner.play().await
    }

    async fn pause(&self) -> Result<(), StimulusError> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<(), StimulusError> {
        self.inner.set_volume(volume).await
    }

    async fn seek_to_start(&self) -> Result<(), StimulusError> {
        self.inner.seek_to_start().await
    }

    async fn unload(&self) -> Result<(), StimulusError> {
        self.inner.unload().await
    }

    fn status(&self) -> watch::Receiver<PlaybackStatus> {
        self.inner.status()
    }
}

// ============================================================================
// Operation serialization and initialization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_operations_run_in_call_order() {
    let player = Arc::new(SlowPlayer::new(Duration::from_millis(40)));
    let output = AudioOutput::new(InstanceId::new(3), AudioConfig::default(), player.clone());

    let (first, stopped, second) = tokio::join!(
        output.play(None, None),
        output.stop(),
        output.play(None, None)
    );
    first.unwrap();
    stopped.unwrap();
    second.unwrap();

    assert_eq!(
        player.log(),
        vec![
            "play:start",
            "play:end",
            "pause:start",
            "pause:end",
            "play:start",
            "play:end",
        ]
    );
    assert_eq!(output.state(), StimulusState::Playing);
}

#[tokio::test(start_paused = true)]
async fn test_play_after_stop_waits_for_teardown() {
    let player = Arc::new(SlowPlayer::new(Duration::from_millis(40)));
    let output = AudioOutput::new(InstanceId::new(3), AudioConfig::default(), player.clone());
    output.play(None, None).await.unwrap();

    let (stopped, played) = tokio::join!(output.stop(), output.play(Some(7.0), None));
    stopped.unwrap();
    played.unwrap();

    // The rewind and volume restore of the stop precede the new play.
    let calls = player.inner.calls();
    let seek = calls
        .iter()
        .rposition(|c| *c == PlayerCall::SeekToStart)
        .unwrap();
    let last_play = calls.iter().rposition(|c| *c == PlayerCall::Play).unwrap();
    assert!(seek < last_play);
    assert!(player.current_playing());
    assert_eq!(output.frequency(), 7.0);
}

#[tokio::test(start_paused = true)]
async fn test_initialization_happens_once() {
    let player = Arc::new(SlowPlayer::new(Duration::from_millis(20)));
    let output = AudioOutput::new(InstanceId::new(3), AudioConfig::default(), player.clone());

    let (a, b, c) = tokio::join!(
        output.prepare(),
        output.play(None, None),
        output.set_frequency(5.0)
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    output.stop().await.unwrap();
    output.play(None, None).await.unwrap();

    assert_eq!(player.inits.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_play_failure_reverts_state() {
    let player = Arc::new(BrokenPlayer {
        inner: LoggingPlayer::new(InstanceId::new(4)),
    });
    let output = AudioOutput::new(InstanceId::new(5), AudioConfig::default(), player);

    let result = output.play(None, None).await;
    assert!(matches!(result, Err(StimulusError::Actuator(_))));
    assert_eq!(output.state(), StimulusState::Idle);
    assert!(!output.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_volume_applied_immediately_when_loaded() {
    let (player, output) = logging_output();

    output.set_volume(0.3).await.unwrap();
    assert!(player.calls().is_empty());

    output.play(None, None).await.unwrap();
    assert_eq!(player.last_volume(), Some(0.3));

    output.set_volume(0.5).await.unwrap();
    assert_eq!(player.last_volume(), Some(0.5));
    assert_eq!(output.volume(), 0.5);

    // The fade ends by restoring the configured volume.
    output.stop().await.unwrap();
    assert_eq!(player.last_volume(), Some(0.5));
}

#[tokio::test(start_paused = true)]
async fn test_volume_change_during_fade_waits_for_stop() {
    let (player, output) = logging_output();
    output.play(Some(6.0), Some(0.8)).await.unwrap();

    let (stopped, changed) = tokio::join!(output.stop(), async {
        sleep(Duration::from_millis(60)).await;
        output.set_volume(0.2).await
    });
    stopped.unwrap();
    changed.unwrap();

    let volumes: Vec<f64> = player
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            PlayerCall::SetVolume(v) => Some(v),
            _ => None,
        })
        .collect();
    let (restore, ramp) = volumes.split_last().unwrap();
    assert_eq!(*restore, 0.2);
    assert_eq!(ramp.len(), 6);
    assert!(ramp.windows(2).all(|w| w[1] < w[0]));
    assert_eq!(output.volume(), 0.2);
}

// ============================================================================
// Kill-switch watchdog
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_kill_switch_pauses_runaway_player() {
    let (player, output) = logging_output();
    output.prepare().await.unwrap();

    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;

    assert!(!player.current().is_playing);
    assert_eq!(output.kill_switch_triggers(), 1);
    assert_eq!(output.state(), StimulusState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_kill_switch_is_debounced() {
    let (player, output) = logging_output();
    output.prepare().await.unwrap();

    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(output.kill_switch_triggers(), 1);

    // Inside the debounce window the report is held, not acted on.
    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(output.kill_switch_triggers(), 1);

    // The held report fires when the window closes.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(output.kill_switch_triggers(), 2);
    assert!(!player.current().is_playing);

    sleep(Duration::from_millis(600)).await;
    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(output.kill_switch_triggers(), 3);
    assert!(!player.current().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_kill_switch_pauses_player_resumed_during_cooldown() {
    let (player, output) = logging_output();
    output.prepare().await.unwrap();

    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;
    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;
    assert!(player.current().is_playing);

    // No further status updates; the held report fires once the cooldown ends.
    sleep(Duration::from_secs(5)).await;
    assert!(!player.current().is_playing);
    assert_eq!(output.kill_switch_triggers(), 2);
    assert_eq!(output.state(), StimulusState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_kill_switch_retries_player_ignoring_pause() {
    let player = Arc::new(StuckPlayer {
        inner: LoggingPlayer::new(InstanceId::new(12)),
        pauses: AtomicUsize::new(0),
    });
    let output = AudioOutput::new(InstanceId::new(13), AudioConfig::default(), player.clone());
    output.prepare().await.unwrap();

    player.inner.publish(RUNAWAY);
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(output.kill_switch_triggers(), 3);
    assert_eq!(player.pauses.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_kill_switch_quiet_during_normal_playback() {
    let (player, output) = logging_output();

    output.play(None, None).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    output.set_frequency(8.0).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    output.stop().await.unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(output.kill_switch_triggers(), 0);
    assert!(!player.current().is_playing);
}

#[tokio::test(start_paused = true)]
async fn test_kill_switch_after_dispose() {
    let (player, output) = logging_output();
    output.play(None, None).await.unwrap();
    output.dispose().await;

    player.publish(RUNAWAY);
    sleep(Duration::from_millis(10)).await;

    assert!(!player.current().is_playing);
    assert_eq!(output.kill_switch_triggers(), 1);
}

// ============================================================================
// Observers and disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_state_observer_sees_stop_sequence() {
    let (_player, output) = logging_output();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: StimulusCallback = Arc::new(move |s: &StimulusState| {
        sink.lock().unwrap().push(*s);
    });
    assert!(output.register_state_observer(observer.clone()));

    output.play(None, None).await.unwrap();
    output.stop().await.unwrap();
    assert_eq!(
        seen.lock().unwrap().clone(),
        vec![
            StimulusState::Playing,
            StimulusState::Stopping,
            StimulusState::Idle,
        ]
    );

    assert!(output.unregister_state_observer(&observer));
    output.play(None, None).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_releases_player() {
    let (player, output) = logging_output();
    output.play(None, None).await.unwrap();
    output.dispose().await;

    let calls = player.calls();
    assert!(calls.contains(&PlayerCall::Pause));
    assert_eq!(calls.last(), Some(&PlayerCall::Unload));
    assert!(output.is_disposed());
    assert_eq!(output.set_frequency(5.0).await, Err(StimulusError::Disposed));
    assert_eq!(output.set_volume(0.5).await, Err(StimulusError::Disposed));
}
