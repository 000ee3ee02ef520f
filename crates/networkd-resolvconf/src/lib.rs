// # resolvconf Resolver
//
// Resolver list adapter backed by the external resolvconf(8) tool.
//
// ## Tool Interface
//
// - `resolvconf -a <source>`: Replace the entries of `<source>` with the
//   `search` / `nameserver` lines read from stdin
// - `resolvconf -d <source>`: Drop the entries of `<source>`
// - `resolvconf -i`: Names of every source with entries
// - `resolvconf -l`: Every source's entries, with `#` comment headers
//
// A non-zero exit status becomes `Error::Resolver` carrying the tool's
// stderr. The adapter keeps no state of its own; every call runs the tool.

use async_trait::async_trait;
use networkd_core::traits::{Resolver, ResolverConfig};
use networkd_core::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Default location of the tool
pub const DEFAULT_RESOLVCONF: &str = "/sbin/resolvconf";

/// Resolver list managed through resolvconf(8)
#[derive(Debug, Clone)]
pub struct ResolvconfResolver {
    program: PathBuf,
    /// Arguments placed before every operation's own
    leading_args: Vec<String>,
}

impl Default for ResolvconfResolver {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLVCONF)
    }
}

impl ResolvconfResolver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Run the tool through an interpreter, e.g. `sh /path/to/resolvconf`
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Run the tool with `args`, feeding it `input`
    ///
    /// # Returns
    ///
    /// - `Ok(String)`: The tool's stdout
    /// - `Err(Error::Resolver)`: The tool could not be run or exited non-zero
    async fn run(&self, args: &[&str], input: Option<&str>) -> Result<String> {
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::resolver(format!("Cannot run {}: {}", self.program.display(), e))
            })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| Error::resolver(format!("Cannot write to resolvconf: {}", e)))?;
            // Closing stdin ends the tool's input
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::resolver(format!("resolvconf did not finish: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::resolver(format!(
                "resolvconf {} failed ({}): {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Resolver for ResolvconfResolver {
    async fn add(&self, source: &str, config: &ResolverConfig) -> Result<()> {
        self.run(&["-a", source], Some(&config.to_text())).await?;
        Ok(())
    }

    async fn delete(&self, source: &str) -> Result<()> {
        self.run(&["-d", source], None).await?;
        Ok(())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let output = self.run(&["-i"], None).await?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    async fn list(&self) -> Result<ResolverConfig> {
        let output = self.run(&["-l"], None).await?;
        Ok(ResolverConfig::parse(&output))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use networkd_core::traits::LOOPBACK_SOURCE;
    use std::net::IpAddr;
    use tempfile::TempDir;

    /// A stand-in for resolvconf(8) keeping one file per source
    const FAKE_RESOLVCONF: &str = r##"
dir="$(dirname "$0")/sources"
mkdir -p "$dir"
case "$1" in
    -a) cat > "$dir/$2" ;;
    -d) rm -f "$dir/$2" ;;
    -i) ls "$dir" ;;
    -l)
        for f in "$dir"/*; do
            [ -e "$f" ] || continue
            echo "# resolv.conf from $(basename "$f")"
            cat "$f"
        done
        ;;
    *) echo "unknown option $1" >&2; exit 2 ;;
esac
"##;

    fn fake_resolver() -> (TempDir, ResolvconfResolver) {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("resolvconf");
        std::fs::write(&script, FAKE_RESOLVCONF).unwrap();

        let resolver = ResolvconfResolver::new("/bin/sh")
            .with_leading_args(vec![script.to_string_lossy().into_owned()]);
        (dir, resolver)
    }

    #[tokio::test]
    async fn test_add_list_delete() {
        let (_dir, resolver) = fake_resolver();
        let lo0 = ResolverConfig::new(
            vec!["10.0.0.53".parse().unwrap()],
            vec!["example.org".into()],
        );
        let em0 = ResolverConfig::new(vec!["192.168.1.1".parse().unwrap()], vec!["lan".into()]);

        resolver.add(LOOPBACK_SOURCE, &lo0).await.unwrap();
        resolver.add("em0", &em0).await.unwrap();

        assert_eq!(resolver.sources().await.unwrap(), vec!["em0", "lo0"]);

        let merged = resolver.list().await.unwrap();
        let mut nameservers = merged.nameservers.clone();
        nameservers.sort();
        assert_eq!(
            nameservers,
            vec![
                "10.0.0.53".parse::<IpAddr>().unwrap(),
                "192.168.1.1".parse().unwrap()
            ]
        );
        assert_eq!(merged.search.len(), 2);

        resolver.delete("em0").await.unwrap();
        assert_eq!(resolver.sources().await.unwrap(), vec!["lo0"]);
        assert_eq!(resolver.list().await.unwrap(), lo0);
    }

    #[tokio::test]
    async fn test_add_replaces_previous_entries() {
        let (_dir, resolver) = fake_resolver();
        let first = ResolverConfig::new(vec!["10.0.0.1".parse().unwrap()], Vec::new());
        let second = ResolverConfig::new(vec!["10.0.0.2".parse().unwrap()], Vec::new());

        resolver.add("em0", &first).await.unwrap();
        resolver.add("em0", &second).await.unwrap();

        assert_eq!(resolver.list().await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_tool_failure_is_a_resolver_error() {
        let missing = ResolvconfResolver::new("/nonexistent/resolvconf");
        let err = missing.sources().await.unwrap_err();
        assert!(matches!(err, Error::Resolver(_)));

        let failing = ResolvconfResolver::new("/bin/sh")
            .with_leading_args(vec!["-c".into(), "echo broken >&2; exit 3".into()]);
        let err = failing.delete("em0").await.unwrap_err();
        assert!(matches!(err, Error::Resolver(_)));
        assert!(err.to_string().contains("broken"));
    }
}
