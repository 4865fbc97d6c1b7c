use crate::config::{under_prefix, SyncConfig};
use std::path::{Component, Path, PathBuf};

/// Where home directories live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeLayout {
    /// Home base on this filesystem, under the install prefix.
    pub base: PathBuf,
    /// Home base as written into passwd entries.
    pub record_base: PathBuf,
    /// Template copied into new home directories.
    pub skeleton: PathBuf,
}

impl HomeLayout {
    #[must_use]
    pub fn from_config(config: &SyncConfig, prefix: &Path) -> Self {
        Self {
            base: under_prefix(prefix, &config.users.home),
            record_base: config.users.home.clone(),
            skeleton: config.users.skeleton.clone(),
        }
    }

    /// Home directory of `username`, or `None` unless the name is a single
    /// plain path component, so the result always stays directly under `base`.
    #[must_use]
    pub fn home_dir(&self, username: &str) -> Option<PathBuf> {
        let mut components = Path::new(username).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == username => Some(self.base.join(name)),
            _ => None,
        }
    }

    #[must_use]
    pub fn record_home(&self, username: &str) -> PathBuf {
        self.record_base.join(username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_layout_from_config_under_prefix() {
        let config = parse_config(
            "[directory]\nurl = \"https://a.example/\"\n[users]\nhome = \"/home/fedora\"\n",
        )
        .unwrap();
        let layout = HomeLayout::from_config(&config, Path::new("/srv/chroot"));
        assert_eq!(
            layout.home_dir("alice"),
            Some(PathBuf::from("/srv/chroot/home/fedora/alice"))
        );
        assert_eq!(layout.record_home("alice"), PathBuf::from("/home/fedora/alice"));
        assert_eq!(layout.skeleton, PathBuf::from("/etc/skel"));
    }

    #[test]
    fn test_home_dir_refuses_paths_leaving_base() {
        let layout = HomeLayout {
            base: PathBuf::from("/home"),
            record_base: PathBuf::from("/home"),
            skeleton: PathBuf::from("/etc/skel"),
        };
        for name in ["", ".", "..", "../victim", "a/b", "/etc", "alice/", "./alice"] {
            assert_eq!(layout.home_dir(name), None, "{name:?}");
        }
        assert_eq!(layout.home_dir("bob.smith"), Some(PathBuf::from("/home/bob.smith")));
    }
}
