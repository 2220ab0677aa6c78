use ebikers::{
    replay, Field, FirmwareProfile, FrameDecoder, MessageStats, Rebroadcaster, Result,
    StatusAggregator,
};
use tracing::info;

// Notifications captured from a Performance Line drive unit
const SAMPLE: &str = "\
# assist mode without payload
30-02-98-09
# unknown 0x9808 and speed
30-07-98-08-08-F4-09-10-01-30-07-98-2D-08-F4-09-10-01
30-02-98-09-30-04-A2-43-08-11-30-05-A2-4A-08-9B-01-30-04-A2-54-08-2E-30-04-A2-51-08-02
# odometer
30-07-98-18-08-AF-D3-C0-01
30-05-98-5A-08-AA-01
30-05-98-5B-08-B4-01
30-04-80-88-08-50
";

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🔍 Decoding sample capture");

    let profile = FirmwareProfile::extended().with_field(0x8088, Field::Battery);
    let decoder = FrameDecoder::new(profile.payload_fallback);
    let mut aggregator = StatusAggregator::new(profile);
    let mut rebroadcaster = Rebroadcaster::new();
    let mut stats = MessageStats::new();

    for (i, buffer) in replay::parse_log(SAMPLE).iter().enumerate() {
        let messages = decoder.decode(buffer);
        stats.record_all(&messages);

        let update = aggregator.apply(&messages);
        println!("\n📦 Notification {} ({} bytes):", i + 1, buffer.len());
        for line in update.summary.lines() {
            println!("  {line}");
        }

        let now_ms = u64::try_from(i).unwrap_or(0) * 500;
        for characteristic in rebroadcaster.updates_for(&update, now_ms) {
            println!(
                "  📡 {} <- {:02X?}",
                characteristic.characteristic.uuid(),
                characteristic.value.as_ref()
            );
        }
    }

    let status = aggregator.status();
    println!("\n📊 Final Status:");
    println!("  Speed: {:.1} km/h", status.speed);
    println!("  Cadence: {} rpm", status.cadence);
    println!("  Rider: {} W", status.human_power);
    println!("  Battery: {}%", status.battery);
    println!("  Assist: {}", status.assist_mode);
    println!("  Odometer: {:.1} km", status.total_distance);
    println!("\n{stats}");

    Ok(())
}
