//! Session control against a running `rollcalld`.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.rollcall.Monitor1",
    default_service = "org.rollcall.Monitor1",
    default_path = "/org/rollcall/Monitor1"
)]
pub trait Monitor {
    async fn start_session(&self, tolerance: f64, stride: u32) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<u64>;
    async fn submit_frame(&self, frame_json: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

pub async fn connect(system_bus: bool) -> Result<MonitorProxy<'static>> {
    let conn = if system_bus {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;

    MonitorProxy::new(&conn)
        .await
        .context("rollcalld is not reachable; is the daemon running?")
}

pub async fn start(proxy: &MonitorProxy<'_>, tolerance: Option<f32>, stride: Option<u32>) -> Result<()> {
    // The daemon reads a negative tolerance and a zero stride as "use the default".
    let status = proxy
        .start_session(tolerance.map_or(-1.0, f64::from), stride.unwrap_or(0))
        .await?;
    let status: serde_json::Value = serde_json::from_str(&status)?;
    println!(
        "Session {} started: {} people loaded, tolerance {}, stride {}",
        status["session_id"].as_str().unwrap_or("?"),
        status["identities"],
        status["tolerance"],
        status["stride"],
    );
    Ok(())
}

pub async fn stop(proxy: &MonitorProxy<'_>) -> Result<()> {
    let recognized = proxy.stop_session().await?;
    println!("Session stopped: {recognized} people recognized");
    Ok(())
}

pub async fn status(proxy: &MonitorProxy<'_>) -> Result<()> {
    let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Submit each line of an NDJSON frame file, optionally paced.
pub async fn feed(proxy: &MonitorProxy<'_>, path: &Path, interval: Option<Duration>) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut submitted = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let outcome = proxy
            .submit_frame(line)
            .await
            .with_context(|| format!("frame on line {} rejected", lineno + 1))?;
        submitted += 1;
        print_outcome(&outcome)?;

        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
    }
    tracing::debug!(submitted, "feed finished");
    Ok(())
}

fn print_outcome(raw: &str) -> Result<()> {
    let outcome: serde_json::Value = serde_json::from_str(raw)?;
    let frame = &outcome["frame_index"];
    if outcome["outcome"] == "skipped" {
        println!("frame {frame}: skipped");
        return Ok(());
    }

    let faces = outcome["faces"].as_array().map(Vec::as_slice).unwrap_or_default();
    if faces.is_empty() {
        println!("frame {frame}: no faces");
    }
    for face in faces {
        let label = face["name"].as_str().unwrap_or("Unknown");
        println!(
            "frame {frame}: {label} (confidence {:.2})",
            face["confidence"].as_f64().unwrap_or(0.0)
        );
    }
    for id in outcome["recognized"].as_array().map(Vec::as_slice).unwrap_or_default() {
        println!("frame {frame}: attendance marked for person {id}");
    }
    Ok(())
}
