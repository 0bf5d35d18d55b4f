use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::app::Application;
use crate::model::CameraStatus;

/// Periodically probes every registered camera's reachability and feeds
/// status transitions back into its supervisor. Runs as a single long-lived
/// task; per-tick probes fan out concurrently so one slow camera cannot
/// delay the others past the shared timeout.
pub async fn run(app: Arc<Application>) {
    let interval = Duration::from_secs(app.config.health.interval_secs);
    let timeout_dur = Duration::from_secs(app.config.health.timeout_secs).min(interval / 3);
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        let cameras = match app.store.list_cameras().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "health prober failed to list cameras");
                continue;
            }
        };

        let probes = cameras.into_iter().map(|camera| {
            let app = app.clone();
            async move {
                let reachable = probe_once(&camera.ingress_url, timeout_dur).await;
                let derived = if reachable {
                    CameraStatus::Online
                } else {
                    CameraStatus::Offline
                };
                if derived != camera.status {
                    let mut updated = camera.clone();
                    updated.status = derived;
                    updated.last_seen = Some(Utc::now());
                    if let Err(e) = app.store.put_camera(updated).await {
                        warn!(camera_id = %camera.id, error = %e, "health prober failed to persist status");
                    }
                    app.bus.publish(crate::bus::BusEvent::CameraStatus {
                        camera_id: camera.id,
                        status: derived,
                    });
                    if derived == CameraStatus::Online {
                        if let Some(handle) = app.get_supervisor(camera.id) {
                            let _ = handle.start().await;
                        }
                    }
                }
            }
        });

        futures_util::future::join_all(probes).await;
    }
}

async fn probe_once(ingress_url: &str, deadline: Duration) -> bool {
    let Some((host, port)) = rtsp_host_port(ingress_url) else {
        debug!(url = ingress_url, "could not parse host/port for probe");
        return false;
    };

    matches!(
        timeout(deadline, TcpStream::connect((host.as_str(), port))).await,
        Ok(Ok(_))
    )
}

fn rtsp_host_port(ingress_url: &str) -> Option<(String, u16)> {
    let url = Url::parse(ingress_url).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port().unwrap_or(554);
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_default_rtsp_port() {
        let (host, port) = rtsp_host_port("rtsp://192.168.1.10/stream1").unwrap();
        assert_eq!(host, "192.168.1.10");
        assert_eq!(port, 554);
    }

    #[test]
    fn parses_explicit_port() {
        let (_, port) = rtsp_host_port("rtsp://cam.local:8554/stream1").unwrap();
        assert_eq!(port, 8554);
    }

    #[test]
    fn rejects_unparsable_url() {
        assert!(rtsp_host_port("not a url").is_none());
    }
}
