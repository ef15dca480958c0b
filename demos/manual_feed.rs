//! Feeds a short synthetic run to the relay by hand, without a bus or a
//! catalog in between. Useful for checking archive connectivity end to end.
//!
//! ```sh
//! RELAY_ARCHIVE_URL=... RELAY_ARCHIVE_TOKEN=... cargo run --example manual_feed
//! ```

use anyhow::Result;
use serde_json::json;
use std::time::Duration;

use daq_relay::archive::ArchiveClient;
use daq_relay::document::{Document, Event, EventDescriptor, RunStart, RunStop};
use daq_relay::relay::DocumentRelay;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let url = std::env::var("RELAY_ARCHIVE_URL")?;
    let token = std::env::var("RELAY_ARCHIVE_TOKEN")?;
    let client = ArchiveClient::new(&url, &token, Duration::from_secs(30))?;

    let relay = DocumentRelay::serve(client);

    let start = RunStart::new().with_field("plan_name", json!("manual_feed"));
    let descriptor = EventDescriptor::new(&start.uid);
    let descriptor_uid = descriptor.uid.clone();
    let run_uid = start.uid.clone();

    relay.submit(Document::RunStart(start))?;
    relay.submit(Document::EventDescriptor(descriptor))?;
    for point in 0..4 {
        let event = Event::new(&descriptor_uid).with_field("power", json!(0.01 * point as f64));
        relay.submit(Document::Event(event))?;
    }
    relay.submit(Document::RunStop(RunStop::new(&run_uid)))?;

    // Keeps the process alive until the queue has drained.
    relay.join().await?;
    Ok(())
}
