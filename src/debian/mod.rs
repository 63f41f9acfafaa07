//! Debian source-tree artefacts (§4.5): `control`, `changelog`, `rules`,
//! `install`, `copyright`. Every formatter here is `Display`-based, not a
//! lossless-editing crate — there is no existing file to preserve, every
//! field is known up front from a [`crate::config::RenderedBlueprint`].

pub mod changelog;
pub mod control;

pub use changelog::Changelog;
pub use control::Control;

const MAINTAINER: &str = "ops2deb <ops2deb@upciti.com>";

/// `debian/rules`: invokes the in-process assembler's equivalent steps by
/// default, or defers everything to `dh` when an external builder handles
/// the actual build (§4.5 step 5).
pub fn rules(external_builder: bool) -> String {
    if external_builder {
        "#!/usr/bin/make -f\n%:\n\tdh $@\n".to_string()
    } else {
        // The in-process assembler (src/deb.rs) does not invoke this file;
        // it is emitted for parity with `--external-builder` trees and so
        // `dpkg-source` tooling that expects one keeps working.
        "#!/usr/bin/make -f\n%:\n\tdh $@ --no-act\n".to_string()
    }
}

/// `debian/install`: every file under `src/` (relative to the staging
/// directory), installed to the package root (§4.5 step 6).
pub fn install_listing(staged_files: &[String]) -> String {
    let mut lines: Vec<String> = staged_files
        .iter()
        .map(|path| format!("src/{path} /{path}"))
        .collect();
    lines.sort();
    lines.join("\n") + if lines.is_empty() { "" } else { "\n" }
}

/// `debian/copyright`: a minimal machine-readable-format stub naming the
/// upstream `Source:` URL when `fetch` was set (§4.5 step 5).
pub fn copyright(name: &str, upstream_source: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("Format: https://www.debian.org/doc/packaging-manuals/copyright-format/1.0/\n");
    out.push_str(&format!("Upstream-Name: {name}\n"));
    if let Some(source) = upstream_source {
        out.push_str(&format!("Source: {source}\n"));
    }
    out.push_str("\nFiles: *\n");
    out.push_str("Copyright: unknown\n");
    out.push_str("License: unknown\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_selects_dh_shim_for_external_builder() {
        assert!(rules(true).contains("dh $@\n"));
        assert!(!rules(true).contains("--no-act"));
    }

    #[test]
    fn install_listing_is_sorted_and_rooted_at_src() {
        let listing = install_listing(&["usr/bin/b".to_string(), "usr/bin/a".to_string()]);
        assert_eq!(listing, "src/usr/bin/a /usr/bin/a\nsrc/usr/bin/b /usr/bin/b\n");
    }

    #[test]
    fn copyright_includes_source_when_present() {
        let text = copyright("demo", Some("https://e.test/demo.tar.gz"));
        assert!(text.contains("Source: https://e.test/demo.tar.gz"));
    }
}
