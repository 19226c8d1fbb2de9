//! A thin watch adapter over the core primitives
//!
//! The core exposes "the absolute paths the last planning pass discovered"
//! and "run once"; this adapter polls content fingerprints of that set and
//! re-runs on any change. Changes arriving while a build is in flight are
//! coalesced: the next poll after completion re-triggers. Build errors are
//! reported and do not terminate the watcher.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use sha2::{Digest, Sha256};
use tokio::time::MissedTickBehavior;

use crate::{error::Result, Compiler};

type Fingerprints = BTreeMap<PathBuf, Option<[u8; 32]>>;

pub(crate) async fn watch(compiler: &mut Compiler, interval: Duration) -> Result<()> {
    // an initial run populates the watched set
    run_once(compiler).await;
    let mut fingerprints = snapshot(compiler);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let current = snapshot(compiler);
        if current != fingerprints {
            tracing::trace!("source change detected, re-planning");
            run_once(compiler).await;
            // re-snapshot after the run so changes made during the build
            // trigger again on the next tick
            fingerprints = snapshot(compiler);
        } else {
            fingerprints = current;
        }
    }
}

async fn run_once(compiler: &mut Compiler) {
    match compiler.compile().await {
        Ok(run) if run.is_unchanged() => tracing::trace!("watched build: nothing to compile"),
        Ok(run) => tracing::trace!("watched build wrote {} artifact(s)", run.artifacts.len()),
        Err(err) => tracing::error!("watched build failed: {}", err),
    }
}

/// Content fingerprints of the watched set; unreadable files fingerprint as
/// `None` so deletions register as changes
fn snapshot(compiler: &Compiler) -> Fingerprints {
    compiler
        .watched_paths()
        .iter()
        .map(|path| {
            let digest = std::fs::read(path).ok().map(|bytes| Sha256::digest(bytes).into());
            (path.clone(), digest)
        })
        .collect()
}
