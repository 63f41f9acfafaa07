//! `debian/changelog` formatter (§4.5 step 4): one entry, generated fresh
//! on every run.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::RenderedBlueprint;

/// The single changelog entry emitted for a rendered blueprint.
pub struct Changelog {
    name: String,
    version_string: String,
    timestamp: DateTime<Utc>,
}

impl Changelog {
    /// Build the changelog entry for `rendered`, stamped at `timestamp`.
    pub fn new(rendered: &RenderedBlueprint, timestamp: DateTime<Utc>) -> Self {
        Changelog {
            name: rendered.name.clone(),
            version_string: debian_version_string(rendered),
            timestamp,
        }
    }
}

/// `<epoch:>version-revision~ops2deb`, the Debian version string embedded
/// in the changelog entry and used to name the produced `.deb` file.
pub fn debian_version_string(rendered: &RenderedBlueprint) -> String {
    let epoch_prefix = if rendered.epoch > 0 {
        format!("{}:", rendered.epoch)
    } else {
        String::new()
    };
    format!(
        "{epoch_prefix}{}-{}~ops2deb",
        rendered.version, rendered.revision
    )
}

impl fmt::Display for Changelog {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{} ({}) unstable; urgency=medium", self.name, self.version_string)?;
        writeln!(f)?;
        writeln!(f, "  * Package generated with ops2deb.")?;
        writeln!(f)?;
        writeln!(f, " -- {}  {}", super::MAINTAINER, self.timestamp.to_rfc2822())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rendered(epoch: u32) -> RenderedBlueprint {
        RenderedBlueprint {
            blueprint_index: 0,
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            architecture: "amd64".to_string(),
            revision: 2,
            epoch,
            homepage: None,
            summary: "s".to_string(),
            description: "d".to_string(),
            depends: vec![],
            recommends: vec![],
            conflicts: vec![],
            fetch_url: None,
            install: vec![],
            script: vec![],
        }
    }

    #[test]
    fn version_string_without_epoch() {
        assert_eq!(debian_version_string(&rendered(0)), "1.0.0-2~ops2deb");
    }

    #[test]
    fn version_string_with_epoch() {
        assert_eq!(debian_version_string(&rendered(3)), "3:1.0.0-2~ops2deb");
    }

    #[test]
    fn entry_has_the_required_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let text = Changelog::new(&rendered(0), ts).to_string();
        assert!(text.starts_with("demo (1.0.0-2~ops2deb) unstable; urgency=medium\n"));
        assert!(text.contains("  * Package generated with ops2deb.\n"));
        assert!(text.contains(" -- ops2deb <ops2deb@upciti.com>  "));
    }
}
