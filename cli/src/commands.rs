use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use prview_git::{DiffResult, DiffTarget, FileStatus, GitRepository};
use prview_live::{JsonLinesSink, LinesSource, LiveDiffService, RefreshHook};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{DiffArgs, WatchArgs};

pub async fn diff(service: &LiveDiffService, repo: Option<&str>, args: &DiffArgs) -> anyhow::Result<()> {
    let result = service
        .diff(repo, args.target())
        .await
        .context("computing diff")?;

    let mut stdout = std::io::stdout().lock();
    if args.summary {
        stdout.write_all(summary(&result).as_bytes())?;
    } else {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
        writeln!(stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

pub async fn watch(service: LiveDiffService, repo: Option<&str>, args: &WatchArgs) -> anyhow::Result<()> {
    let service = if args.stats {
        let repository = service.repository(repo)?;
        service.with_on_refresh(Arc::new(LogDiffStats { repository }))
    } else {
        service
    };

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted");
                cancel.cancel();
            }
        })
    };

    let sink = JsonLinesSink::new(tokio::io::stdout());
    let source = LinesSource::new(BufReader::new(tokio::io::stdin()));
    let exit = service.serve(repo, sink, source, cancel).await;

    interrupt.abort();
    service.manager().shutdown();

    let exit = exit.context("watching for changes")?;
    info!("stopped watching: {exit:?}");
    Ok(())
}

/// Logs the current diff totals before each refresh notice.
struct LogDiffStats {
    repository: GitRepository,
}

#[async_trait]
impl RefreshHook for LogDiffStats {
    async fn before_refresh(&self, directory: &Path) {
        match self.repository.diff(DiffTarget::default()).await {
            Ok(result) => info!(
                "{}: {} files changed, +{} -{}",
                directory.display(),
                result.files.len(),
                result.additions,
                result.deletions
            ),
            Err(e) => warn!("diff for {} failed: {e}", directory.display()),
        }
    }
}

/// One `+N -M  name` line per file, then the totals.
fn summary(result: &DiffResult) -> String {
    let mut out = String::new();
    for file in &result.files {
        let marker = match file.status {
            FileStatus::Added => "A",
            FileStatus::Deleted => "D",
            FileStatus::Renamed => "R",
            FileStatus::Modified => "M",
        };
        let name = match file.status {
            FileStatus::Renamed => format!("{} -> {}", file.old_name, file.new_name),
            _ => file.display_name().to_string(),
        };
        let counts = if file.is_binary {
            "binary".to_string()
        } else {
            format!("+{} -{}", file.additions, file.deletions)
        };
        let _ = writeln!(out, "{marker} {counts:>12}  {name}");
    }
    let _ = writeln!(
        out,
        "{} files changed, +{} -{}",
        result.files.len(),
        result.additions,
        result.deletions
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_summary() {
        let result = prview_git::parse(
            "diff --git a/src/lib.rs b/src/lib.rs
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,2 +1,2 @@
-old
+new
 same
diff --git a/old.rs b/new.rs
similarity index 100%
rename from old.rs
rename to new.rs
diff --git a/logo.png b/logo.png
new file mode 100644
Binary files /dev/null and b/logo.png differ
",
        );

        assert_eq!(
            summary(&result),
            "\
M        +1 -1  src/lib.rs
R        +0 -0  old.rs -> new.rs
A       binary  logo.png
3 files changed, +1 -1
"
        );
    }

    #[test]
    fn test_summary_of_clean_tree() {
        assert_eq!(summary(&DiffResult::default()), "0 files changed, +0 -0\n");
    }
}
