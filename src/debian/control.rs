//! `debian/control` formatter, grounded on the teacher pack's
//! `Display`-based `Source`/`Package` stanza writers.

use std::fmt;

use crate::config::RenderedBlueprint;

const DESCRIPTION_WRAP_WIDTH: usize = 79;

/// `debian/control`'s `Source:` stanza. Identical across every rendered
/// instance of a blueprint, so it's built once from the blueprint name.
pub struct Source<'a> {
    name: &'a str,
    homepage: Option<&'a str>,
}

impl<'a> Source<'a> {
    /// Build the source stanza for `rendered`.
    pub fn new(rendered: &'a RenderedBlueprint) -> Self {
        Source {
            name: &rendered.name,
            homepage: rendered.homepage.as_deref(),
        }
    }
}

impl fmt::Display for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Source: {}", self.name)?;
        writeln!(f, "Section: devel")?;
        writeln!(f, "Priority: optional")?;
        writeln!(f, "Maintainer: {}", super::MAINTAINER)?;
        writeln!(f, "Build-Depends: debhelper-compat (= 13)")?;
        if let Some(homepage) = self.homepage {
            writeln!(f, "Homepage: {homepage}")?;
        }
        Ok(())
    }
}

/// `debian/control`'s single binary `Package:` stanza.
pub struct Package<'a> {
    name: &'a str,
    architecture: &'a str,
    depends: &'a [String],
    recommends: &'a [String],
    conflicts: &'a [String],
    summary: &'a str,
    description: &'a str,
}

impl<'a> Package<'a> {
    /// Build the binary stanza for `rendered`.
    pub fn new(rendered: &'a RenderedBlueprint) -> Self {
        Package {
            name: &rendered.name,
            architecture: &rendered.architecture,
            depends: &rendered.depends,
            recommends: &rendered.recommends,
            conflicts: &rendered.conflicts,
            summary: &rendered.summary,
            description: &rendered.description,
        }
    }

    fn write_description(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Description: {}", self.summary)?;
        for line in textwrap::wrap(self.description.trim(), DESCRIPTION_WRAP_WIDTH) {
            let line = line.trim_end();
            if line.is_empty() {
                writeln!(f, " .")?;
            } else {
                writeln!(f, " {line}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Package: {}", self.name)?;
        writeln!(f, "Architecture: {}", self.architecture)?;
        if !self.depends.is_empty() {
            writeln!(f, "Depends: {}", self.depends.join(", "))?;
        }
        if !self.recommends.is_empty() {
            writeln!(f, "Recommends: {}", self.recommends.join(", "))?;
        }
        if !self.conflicts.is_empty() {
            writeln!(f, "Conflicts: {}", self.conflicts.join(", "))?;
        }
        self.write_description(f)
    }
}

/// The full `debian/control` file for one rendered blueprint: a `Source`
/// stanza, a blank line, then a single binary `Package` stanza.
pub struct Control<'a> {
    source: Source<'a>,
    package: Package<'a>,
}

impl<'a> Control<'a> {
    /// Build the complete control file for `rendered`.
    pub fn new(rendered: &'a RenderedBlueprint) -> Self {
        Control {
            source: Source::new(rendered),
            package: Package::new(rendered),
        }
    }
}

impl fmt::Display for Control<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.source)?;
        writeln!(f)?;
        write!(f, "{}", self.package)
    }
}
