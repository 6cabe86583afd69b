//! Source racing: pick the fastest responding mirror before first attach.

use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

/// Races HEAD probes against every source and returns the index of the first
/// to answer successfully.
///
/// Each probe is capped at `probe_timeout`. If no source answers in time, or
/// the list has fewer than two entries, index 0 is returned so the caller
/// always has a deterministic starting point.
pub async fn select_best_source(
    client: &reqwest::Client,
    sources: &[String],
    probe_timeout: Duration,
) -> usize {
    if sources.len() < 2 {
        return 0;
    }

    let mut probes: FuturesUnordered<_> = sources
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let request = client.head(url).timeout(probe_timeout).send();
            async move {
                match request.await {
                    Ok(response) if response.status().is_success() => Some(index),
                    _ => None,
                }
            }
        })
        .collect();

    while let Some(result) = probes.next().await {
        if let Some(index) = result {
            debug!("Source race won by index {index}");
            return index;
        }
    }

    debug!("Source race had no winner, falling back to index 0");
    0
}
