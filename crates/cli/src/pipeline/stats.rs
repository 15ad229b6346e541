//! Statistics from a gateway run.

use std::time::Duration;

use dispatcher::{MetricsSnapshot as SinkSnapshot, QueueStats};
use ingestion::MetricsSnapshot;
use tp_assembly::TpStats;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Wall time from start to the end of the drain
    pub duration: Duration,

    /// Connection, frame and record counters
    pub ingestion: MetricsSnapshot,

    /// Gate occupancy and drop counters per stream
    pub queues: Vec<QueueStats>,

    pub tp: TpStats,

    pub batches_flushed: u64,

    /// Final metrics per sink
    pub sinks: Vec<(String, SinkSnapshot)>,

    /// SIGHUP-triggered reloads
    pub dictionary_reloads: usize,
}

impl PipelineStats {
    /// Frames per second over the whole run
    pub fn frame_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.ingestion.frames_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of enqueue attempts refused by the gate, in percent
    pub fn drop_rate(&self) -> f64 {
        let total = self.ingestion.records_enqueued + self.ingestion.records_dropped;
        if total > 0 {
            (self.ingestion.records_dropped as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Gateway Statistics ===\n");

        println!("Overview");
        println!("   |- Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   |- Frame rate: {:.2}/s", self.frame_rate());
        println!("   |- Record drop rate: {:.2}%", self.drop_rate());
        println!("   |- Dictionary reloads: {}", self.dictionary_reloads);
        println!("   `- Batches flushed: {}", self.batches_flushed);

        println!("\n{}", self.ingestion);

        println!("\nTP Sessions");
        println!(
            "   |- Started: {}, completed: {}",
            self.tp.started, self.tp.completed
        );
        println!(
            "   |- Expired: {}, evicted: {}, overwritten: {}",
            self.tp.expired, self.tp.evicted, self.tp.overwritten
        );
        println!("   `- Orphan frames: {}", self.tp.ignored);

        if !self.queues.is_empty() {
            println!("\nQueues");
            for (i, queue) in self.queues.iter().enumerate() {
                let prefix = if i == self.queues.len() - 1 { "`-" } else { "|-" };
                println!(
                    "   {} {}: accepted {}, soft drops {}, hard drops {}, evictions {}, left {}",
                    prefix,
                    queue.stream,
                    queue.accepted,
                    queue.soft_drops,
                    queue.hard_drops,
                    queue.evictions,
                    queue.len
                );
            }
        }

        if !self.sinks.is_empty() {
            println!("\nSinks");
            for (i, (name, sink)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "`-" } else { "|-" };
                println!(
                    "   {} {}: {} records in {} batches, {} failures, {} dropped",
                    prefix,
                    name,
                    sink.records_written,
                    sink.batches_written,
                    sink.failure_count,
                    sink.dropped_count
                );
            }
        }

        println!();
    }
}
