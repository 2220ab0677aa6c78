use async_trait::async_trait;
use ebikers::{
    replay, BatteryAlert, CharacteristicUpdate, EbikeSession, Result,
    SessionConfig, StatusSink, StatusUpdate, TransportEvent,
};
use tracing::{error, info};

/// Prints everything the session produces
struct ConsoleSink;

#[async_trait]
impl StatusSink for ConsoleSink {
    async fn status_changed(&self, update: &StatusUpdate) -> Result<()> {
        for line in update.summary.lines() {
            println!("  {line}");
        }
        Ok(())
    }

    async fn battery_alert(&self, alert: &BatteryAlert) -> Result<()> {
        println!("🔔 {}", alert.message());
        Ok(())
    }

    async fn characteristic_changed(&self, update: &CharacteristicUpdate) -> Result<()> {
        println!(
            "  📡 {:?} <- {:02X?}",
            update.characteristic,
            update.value.as_ref()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let Some(path) = std::env::args().nth(1) else {
        error!("Usage: replay_log <capture.txt>");
        return Ok(());
    };

    info!("📼 Replaying capture {path}");
    let buffers = replay::load_log(&path)?;

    let config = SessionConfig::default();
    let (tx, rx) = EbikeSession::channel(&config)?;
    let mut session = EbikeSession::new(config)?;
    let mut watcher = session.subscribe();

    // Feed the capture from a separate task, like a BLE callback thread would
    let producer = tokio::spawn(async move {
        let _ = tx.send(TransportEvent::Connected).await;
        for buffer in buffers {
            if tx
                .send(TransportEvent::Notification(buffer.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let monitor = tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            let status = watcher.borrow_and_update().clone();
            info!(
                "📊 {:.1} km/h, {} rpm, {} W rider, {} W motor, {}%, {}",
                status.speed,
                status.cadence,
                status.human_power,
                status.motor_power,
                status.battery,
                status.assist_mode
            );
        }
    });

    let summary = session.run_channel(rx, &ConsoleSink).await?;
    let _ = producer.await;

    println!("\n📈 Capture Summary:");
    println!("  Notifications: {}", summary.notifications);
    println!("  Messages: {}", summary.messages);
    println!("\n{}", session.stats());

    // Dropping the session closes the watch channel and ends the monitor
    drop(session);
    let _ = monitor.await;

    Ok(())
}
