// FlowState Sim - End-to-end tests
//
// Runs the simulator on a loopback port and drives the real WebSocket
// source, controller and audio adapter against it.

use flowstate::{
    AudioConfig, AudioOutput, BandState, ClosedLoopController, ConnectionState, ControllerConfig,
    ControllerState, IdFactory, LoggingPlayer, MetricsSample, MetricsSource, ProcessingConfig,
    SimulatedSource, SimulatedSourceConfig, StimulusOutput,
};
use flowstate_sim::{GeneratorConfig, RawEegConfig, ServerConfig, ServerStats, SimulatorServer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

async fn spawn_server(rate_hz: u32) -> (String, ServerStats, JoinHandle<()>) {
    spawn_with(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        rate_hz,
        generator: GeneratorConfig::new().with_seed(11),
        raw: None,
    })
    .await
}

async fn spawn_with(config: ServerConfig) -> (String, ServerStats, JoinHandle<()>) {
    let server = SimulatorServer::bind(config).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let stats = server.stats();
    let task = tokio::spawn(async move {
        let _ = server.run().await;
    });
    (url, stats, task)
}

/// Poll `check` every 10ms for up to five seconds
async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

#[tokio::test]
async fn test_source_receives_stream_and_steers_generator() {
    let (url, stats, server) = spawn_server(50).await;
    let ids = IdFactory::new();
    let source = SimulatedSource::websocket(ids.next_id(), SimulatedSourceConfig::with_url(url));

    let samples = Arc::new(Mutex::new(Vec::<MetricsSample>::new()));
    let sink = Arc::clone(&samples);
    source.register_metrics(Arc::new(move |s: &MetricsSample| {
        sink.lock().unwrap().push(s.clone());
    }));

    source.start().await.unwrap();
    wait_for("connection", || source.connection_state() == ConnectionState::Connected).await;
    wait_for("samples", || samples.lock().unwrap().len() >= 3).await;
    assert_eq!(stats.client_count(), 1);

    assert!(source.force_state(BandState::Low));
    wait_for("forced state", || stats.forced_state() == Some(BandState::Low)).await;
    samples.lock().unwrap().clear();
    wait_for("forced samples", || samples.lock().unwrap().len() >= 3).await;
    for sample in samples.lock().unwrap().iter() {
        assert_eq!(sample.forced_state, Some(BandState::Low));
        assert_eq!(sample.band_state, BandState::Low);
    }

    assert!(source.clear_forced_state());
    wait_for("cleared state", || stats.forced_state().is_none()).await;

    source.stop().await.unwrap();
    wait_for("client removal", || stats.client_count() == 0).await;
    assert_eq!(source.connection_state(), ConnectionState::Disconnected);
    server.abort();
}

#[tokio::test]
async fn test_no_samples_without_clients() {
    let (_url, stats, server) = spawn_server(100).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.samples_sent(), 0);
    server.abort();
}

#[tokio::test]
async fn test_closed_loop_follows_forced_states() {
    let (url, _stats, server) = spawn_server(50).await;
    let ids = IdFactory::new();

    let source = Arc::new(SimulatedSource::websocket(
        ids.next_id(),
        SimulatedSourceConfig::with_url(url),
    ));
    let player = Arc::new(LoggingPlayer::new(ids.next_id()));
    let audio_config = AudioConfig {
        fade_out_ms: 50,
        ..Default::default()
    };
    let output = Arc::new(AudioOutput::new(ids.next_id(), audio_config, player.clone()));
    let controller = ClosedLoopController::new(
        ids.next_id(),
        source.clone(),
        output.clone(),
        ControllerConfig {
            min_dwell_ms: 200,
            cooldown_ms: 200,
            ..Default::default()
        },
    )
    .unwrap();

    controller.start().await.unwrap();
    assert_eq!(controller.state(), ControllerState::Monitoring);
    wait_for("connection", || source.is_connected()).await;

    assert!(source.force_state(BandState::Low));
    wait_for("entrainment", || controller.state() == ControllerState::Entraining).await;
    wait_for("playback", || player.current().is_playing).await;
    assert_eq!(controller.entrainment_count(), 1);

    assert!(source.force_state(BandState::High));
    wait_for("cooldown", || controller.state() != ControllerState::Entraining).await;
    wait_for("silence", || !player.current().is_playing).await;

    // High band power never restarts the stimulus.
    wait_for("monitoring", || controller.state() == ControllerState::Monitoring).await;
    sleep(Duration::from_millis(200)).await;
    assert_eq!(controller.state(), ControllerState::Monitoring);
    assert_eq!(controller.entrainment_count(), 1);

    controller.stop().await;
    output.dispose().await;
    assert_eq!(controller.state(), ControllerState::Idle);
    assert_eq!(output.kill_switch_triggers(), 0);
    server.abort();
}

#[tokio::test]
async fn test_raw_model_streams_processed_band_power() {
    let raw = RawEegConfig {
        blink_probability: 0.0,
        calibration_secs: 5.0,
        processing: ProcessingConfig {
            window_secs: 0.5,
            ..Default::default()
        },
        ..RawEegConfig::new().with_seed(21)
    };
    let (url, stats, server) = spawn_with(ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        rate_hz: 50,
        raw: Some(raw),
        ..Default::default()
    })
    .await;

    let ids = IdFactory::new();
    let source = SimulatedSource::websocket(ids.next_id(), SimulatedSourceConfig::with_url(url));
    let samples = Arc::new(Mutex::new(Vec::<MetricsSample>::new()));
    let sink = Arc::clone(&samples);
    source.register_metrics(Arc::new(move |s: &MetricsSample| {
        sink.lock().unwrap().push(s.clone());
    }));

    source.start().await.unwrap();
    wait_for("connection", || source.is_connected()).await;
    assert!(source.force_state(BandState::Low));
    wait_for("forced state", || stats.forced_state() == Some(BandState::Low)).await;

    // Once the window holds only low-theta signal, the z-score follows.
    wait_for("low band", || {
        samples
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.forced_state == Some(BandState::Low) && s.band_state == BandState::Low)
    })
    .await;
    for sample in samples.lock().unwrap().iter() {
        assert!((0.0..=100.0).contains(&sample.signal_quality));
    }

    source.stop().await.unwrap();
    server.abort();
}
