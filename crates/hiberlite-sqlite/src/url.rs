//! Embedded database locations.

use std::fmt;
use std::path::{Path, PathBuf};

use hiberlite_core::{Error, Result};

/// Location used when no URL is configured: a database file in the user's
/// home directory.
pub const DEFAULT_URL: &str = "sqlite:~/hibernate_examples";

const SCHEME: &str = "sqlite:";
const MEMORY: &str = ":memory:";

/// A resolved embedded database location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// A database file.
    File(PathBuf),
    /// A private in-memory database (one per connection).
    Memory,
}

impl DatabaseUrl {
    /// Parse a `sqlite:` URL.
    ///
    /// - `sqlite::memory:` selects an in-memory database.
    /// - `sqlite:~/name` is resolved against the user's home directory.
    /// - A path without extension gets `.db` appended.
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url.strip_prefix(SCHEME).ok_or_else(|| {
            Error::config("url", format!("`{url}` is not a `{SCHEME}` url"))
        })?;
        if rest == MEMORY {
            return Ok(DatabaseUrl::Memory);
        }
        if rest.trim().is_empty() {
            return Err(Error::config("url", format!("`{url}` has no database path")));
        }

        let path = match rest.strip_prefix("~/") {
            Some(relative) => home_dir(url)?.join(relative),
            None if rest == "~" => {
                return Err(Error::config("url", format!("`{url}` names a directory")));
            }
            None => PathBuf::from(rest),
        };

        Ok(DatabaseUrl::File(with_default_extension(path)))
    }

    /// Database file path, if this is a file database.
    pub fn path(&self) -> Option<&Path> {
        match self {
            DatabaseUrl::File(path) => Some(path),
            DatabaseUrl::Memory => None,
        }
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseUrl::File(path) => write!(f, "{SCHEME}{}", path.display()),
            DatabaseUrl::Memory => write!(f, "{SCHEME}{MEMORY}"),
        }
    }
}

fn home_dir(url: &str) -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| {
        Error::config(
            "url",
            format!("`{url}` is relative to the home directory, which cannot be determined"),
        )
    })
}

fn with_default_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_url() {
        assert_eq!(DatabaseUrl::parse("sqlite::memory:").unwrap(), DatabaseUrl::Memory);
        assert_eq!(DatabaseUrl::Memory.to_string(), "sqlite::memory:");
    }

    #[test]
    fn test_absolute_path_gets_extension() {
        let url = DatabaseUrl::parse("sqlite:/tmp/people").unwrap();
        assert_eq!(url.path(), Some(Path::new("/tmp/people.db")));
    }

    #[test]
    fn test_explicit_extension_is_kept() {
        let url = DatabaseUrl::parse("sqlite:/tmp/people.sqlite3").unwrap();
        assert_eq!(url.path(), Some(Path::new("/tmp/people.sqlite3")));
    }

    #[test]
    fn test_default_url_resolves_under_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let url = DatabaseUrl::parse(DEFAULT_URL).unwrap();
        assert_eq!(url.path(), Some(home.join("hibernate_examples.db").as_path()));
    }

    #[test]
    fn test_rejects_foreign_scheme() {
        let err = DatabaseUrl::parse("jdbc:h2:~/hibernate_examples").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_rejects_empty_path() {
        assert!(DatabaseUrl::parse("sqlite:").is_err());
        assert!(DatabaseUrl::parse("sqlite:~").is_err());
    }
}
