use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::{CaptureBatch, WriteOutcome};

/// A destination that stores one labelled slot per capture time and can
/// report the label of the last slot it holds for the batch's day.
///
/// Both spreadsheet sinks implement this; the dedup rule lives once in
/// [`append_dedup`].
#[async_trait]
pub trait TabularBackend: Send {
    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Label this batch would be stored under.
    fn slot_label(&self, batch: &CaptureBatch) -> String;

    async fn last_label(&mut self, batch: &CaptureBatch) -> Result<Option<String>>;

    async fn append(&mut self, batch: &CaptureBatch) -> Result<()>;
}

/// Append `batch` unless the most recent slot already carries its label.
///
/// Only the last slot is compared: a late capture of an earlier minute is
/// appended again.
pub async fn append_dedup<B>(backend: &mut B, batch: &CaptureBatch) -> Result<WriteOutcome>
where
    B: TabularBackend + ?Sized,
{
    let label = backend.slot_label(batch);
    if backend.last_label(batch).await?.as_deref() == Some(label.as_str()) {
        info!(sink = backend.name(), symbol = %batch.symbol, slot = %label, "slot already recorded, skipping");
        return Ok(WriteOutcome::Skipped);
    }

    backend.append(batch).await?;
    info!(
        sink = backend.name(),
        symbol = %batch.symbol,
        slot = %label,
        quotes = batch.quotes.len(),
        "capture written"
    );
    Ok(WriteOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[derive(Default)]
    struct Memory {
        slots: Vec<String>,
    }

    #[async_trait]
    impl TabularBackend for Memory {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn slot_label(&self, batch: &CaptureBatch) -> String {
            batch.timestamp.format("%H:%M").to_string()
        }

        async fn last_label(&mut self, _batch: &CaptureBatch) -> Result<Option<String>> {
            Ok(self.slots.last().cloned())
        }

        async fn append(&mut self, batch: &CaptureBatch) -> Result<()> {
            let label = self.slot_label(batch);
            self.slots.push(label);
            Ok(())
        }
    }

    fn batch(h: u32, m: u32, s: u32) -> CaptureBatch {
        CaptureBatch {
            symbol: "NIFTY".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 7, 16)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
            underlying_value: 24500.0,
            quotes: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_same_minute_is_skipped() {
        let mut sink = Memory::default();
        assert_eq!(append_dedup(&mut sink, &batch(10, 0, 0)).await.unwrap(), WriteOutcome::Written);
        assert_eq!(append_dedup(&mut sink, &batch(10, 0, 40)).await.unwrap(), WriteOutcome::Skipped);
        assert_eq!(append_dedup(&mut sink, &batch(10, 30, 0)).await.unwrap(), WriteOutcome::Written);
        assert_eq!(sink.slots, ["10:00", "10:30"]);
    }

    #[tokio::test]
    async fn test_only_last_slot_is_compared() {
        let mut sink = Memory::default();
        append_dedup(&mut sink, &batch(10, 0, 0)).await.unwrap();
        append_dedup(&mut sink, &batch(10, 30, 0)).await.unwrap();
        let outcome = append_dedup(&mut sink, &batch(10, 0, 0)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(sink.slots.len(), 3);
    }
}
