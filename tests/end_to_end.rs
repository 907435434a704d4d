use std::sync::Arc;
use std::time::Duration;

use arcade_host::plugin::KeyInput;
use arcade_host::sandbox::CONTENT_SECURITY_POLICY;
use arcade_host::shmem::{InputStateReader, InputStateWriter, SharedMemoryBridge, SharedRegion, SPINNER_DATA_LEN};
use arcade_host::{
    GameDescriptor, GameKey, HostConfig, HostOrchestrator, PluginError, RenderSurface, INPUT_CLASSIC,
};
use axum::routing::get;
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use semver::Version;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use url::Url;

fn pong_archive() -> Vec<u8> {
    let files = [
        ("pong-1.0.0/index.html", "<!doctype html><html><head><title>pong</title></head><body></body></html>"),
        ("pong-1.0.0/main.js", "console.log('pong')"),
    ];
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

async fn serve_archive() -> Url {
    let body = pong_archive();
    let app = Router::new().route("/pong.tar.gz", get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    Url::parse(&format!("http://{addr}/pong.tar.gz")).unwrap()
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pong_download_serve_play_unload() {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig::new(dir.path().join("games"));
    config.ensure_dirs().unwrap();
    let host = HostOrchestrator::new(&config);

    let pong = GameDescriptor::new("pong")
        .with_version(Version::new(1, 0, 0))
        .with_dependency(INPUT_CLASSIC, "1.0.0")
        .with_content_url(serve_archive().await);
    let surface = Arc::new(RenderSurface::new("main"));
    let loaded = host.load_game(&pong, surface.clone()).await.unwrap();

    assert_eq!(loaded.key, GameKey::new("pong", "1.0.0"));
    assert_eq!(loaded.url.host_str(), Some("localhost"));
    assert!(host.cache().is_cached("pong", "1.0.0"));

    // Served from the cache, sandboxed.
    let http = client();
    let index = http.get(loaded.url.clone()).send().await.unwrap();
    assert_eq!(index.status(), 200);
    assert_eq!(
        index.headers()["content-security-policy"].to_str().unwrap(),
        CONTENT_SECURITY_POLICY
    );
    let html = index.text().await.unwrap();
    assert!(html.contains("<title>pong</title>"));
    assert!(html.find("<script>").unwrap() < html.find("<title>").unwrap());

    let script = http.get(loaded.url.join("main.js").unwrap()).send().await.unwrap();
    assert_eq!(script.headers()["content-type"], "application/javascript");

    // The game acquires its controls and sees key presses.
    let mut controls = loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.unwrap();
    assert_eq!(controls.version, "1.0.0");
    surface.dispatch(&KeyInput::down("ArrowLeft"));
    let message = tokio::time::timeout(Duration::from_secs(1), controls.port.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        message,
        json!({"type": "button", "player": 1, "button": "LEFT", "pressed": true})
    );

    // A second channel to the same plugin feeds a shared-memory client.
    let mirrored = loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await.unwrap();
    let region = Arc::new(SharedRegion::anonymous(SPINNER_DATA_LEN).unwrap());
    let writer = InputStateWriter::new(region.clone()).unwrap();
    let reader = InputStateReader::new(region);
    let bridge_cancel = CancellationToken::new();
    let bridge = SharedMemoryBridge::spawn(mirrored.port, writer, bridge_cancel.clone());

    surface.dispatch(&KeyInput::down("ArrowUp"));
    let mut state = reader.snapshot();
    for _ in 0..200 {
        if state.player1_up {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        state = reader.snapshot();
    }
    assert!(state.connected);
    assert!(state.player1_up);
    assert!(!state.player1_down);

    bridge_cancel.cancel();
    bridge.await.unwrap().unwrap();

    // Unloading tears down the server and plugins but keeps the cache.
    host.unload_game("pong", "1.0.0").await;
    assert_eq!(surface.listener_count(), 0);
    assert!(http.get(loaded.url.clone()).send().await.is_err());
    assert!(host.cache().is_cached("pong", "1.0.0"));
    assert!(matches!(
        loaded.channels.acquire(INPUT_CLASSIC, "^1.0.0").await,
        Err(PluginError::ChannelClosed)
    ));
}

#[tokio::test]
async fn test_override_and_denied_channel() {
    let dir = tempfile::tempdir().unwrap();
    let config = HostConfig::new(dir.path().join("games")).with_override("pong@LOCAL=http://localhost:5173");
    let host = HostOrchestrator::new(&config);

    let pong = GameDescriptor::new("pong").with_dependency(INPUT_CLASSIC, "^1.0.0");
    let loaded = host
        .load_game(&pong, Arc::new(RenderSurface::new("main")))
        .await
        .unwrap();
    assert_eq!(loaded.url.as_str(), "http://localhost:5173/");
    assert!(host.servers().is_override(&loaded.key));

    let denied = loaded.channels.acquire("@host/lasers", "^1.0.0").await;
    assert!(matches!(denied, Err(PluginError::ChannelDenied(msg)) if msg == "Unknown plugin: @host/lasers"));

    let too_new = loaded.channels.acquire(INPUT_CLASSIC, "^2.0.0").await;
    assert!(matches!(too_new, Err(PluginError::ChannelDenied(_))));

    host.shutdown().await;
    // Overrides survive a shutdown.
    assert_eq!(host.servers().url(&loaded.key), Some(loaded.url));
}
