//! Version control detection and default revision commands

use std::path::Path;

use crate::Script;

/// Version control system an application repository uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vcs {
    Git,
    Mercurial,
    Bazaar,
    Subversion,
}

impl Vcs {
    /// Detect the VCS from marker directories next to the metadata file.
    /// Falls back to git when nothing is found.
    #[must_use]
    pub fn detect(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::Git;
        };
        [
            (".git", Self::Git),
            (".hg", Self::Mercurial),
            (".bzr", Self::Bazaar),
            (".svn", Self::Subversion),
        ]
        .into_iter()
        .find(|(marker, _)| dir.join(marker).is_dir())
        .map_or(Self::Git, |(_, vcs)| vcs)
    }

    /// Command printing the current revision id
    #[must_use]
    pub fn revision(self) -> Script {
        Script::single(match self {
            Self::Git => "git rev-parse HEAD",
            Self::Mercurial => "hg log -r . --template '{node}'",
            Self::Bazaar => "bzr revision-info --tree",
            Self::Subversion => "svnversion",
        })
    }

    /// Command printing the author of the current revision
    #[must_use]
    pub fn author(self) -> Script {
        Script::single(match self {
            Self::Git => "git log -1 --pretty='%aN <%aE>'",
            Self::Mercurial => "hg log -r . --template '{author}'",
            Self::Bazaar => "bzr log -l 1 | sed -n 's/^committer: //p'",
            Self::Subversion => "svn info --show-item last-changed-author",
        })
    }

    /// Command printing the date of the current revision
    #[must_use]
    pub fn date(self) -> Script {
        Script::single(match self {
            Self::Git => "git log -1 --pretty='%at'",
            Self::Mercurial => "hg log -r . --template '{date|hgdate}'",
            Self::Bazaar => "bzr log -l 1 | sed -n 's/^timestamp: //p'",
            Self::Subversion => "svn info --show-item last-changed-date",
        })
    }

    /// Command printing the message of the current revision
    #[must_use]
    pub fn description(self) -> Script {
        Script::single(match self {
            Self::Git => "git log -1 --pretty='%B'",
            Self::Mercurial => "hg log -r . --template '{desc}'",
            Self::Bazaar => "bzr log -l 1 --line",
            Self::Subversion => "svn log -l 1",
        })
    }

    /// Command listing changes between `%old%` and `%new%`
    #[must_use]
    pub fn changelog(self) -> Script {
        Script::single(match self {
            Self::Git => "git log --no-merges %old%..%new%",
            Self::Mercurial => "hg log -r %old%:%new%",
            Self::Bazaar => "bzr log -r revid:%old%..revid:%new%",
            Self::Subversion => "svn log -r %old%:%new%",
        })
    }
}
