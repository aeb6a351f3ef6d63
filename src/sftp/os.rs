use std::fmt;

use super::transport::SshSession;

/// Family of the operating system behind an SSH server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OsType {
    #[default]
    Unknown,
    Linux,
    MacOs,
    /// FreeBSD, OpenBSD, NetBSD and friends
    Bsd,
}

impl OsType {
    /// Classifies the output of `uname -s`
    pub fn from_uname(output: &str) -> Self {
        match output.trim() {
            "Linux" => Self::Linux,
            "Darwin" => Self::MacOs,
            name if name.ends_with("BSD") => Self::Bsd,
            _ => Self::Unknown,
        }
    }

    /// Asks the server for its kernel name. Servers that refuse command
    /// execution stay [`OsType::Unknown`].
    pub async fn detect(session: &dyn SshSession) -> Self {
        match session.exec("uname -s").await {
            Ok(output) => {
                let os = Self::from_uname(&output);
                debug!("remote system {:?} detected as {os}", output.trim());
                os
            }
            Err(err) => {
                debug!("can't detect remote system: {err}");
                Self::Unknown
            }
        }
    }

    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Linux => "Linux",
            Self::MacOs => "macOS",
            Self::Bsd => "BSD",
        })
    }
}
