//! Control-plane protocol - paths, query keys, and request validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Written once to the server's stdout right after the listener is bound.
pub const LAUNCH_ACK: &str = "Launched\n";

/// Private flag that makes the binary run the server loop.
pub const LAUNCH_FLAG: &str = "--launch";

pub const TYPESET_PATH: &str = "/typeset";
pub const STATUS_PAGE_PATH: &str = "/";
pub const STATUS_JSON_PATH: &str = "/status";
pub const QUIT_PATH: &str = "/quit";

pub const DIRECTORY_KEY: &str = "dir";
pub const ARGUMENTS_KEY: &str = "args";

/// Trailer carrying the engine's exit status in decimal.
pub const STATUS_TRAILER: &str = "Typeset-Status";

/// Why a compile request was rejected.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    #[error("missing `dir` parameter")]
    MissingDirectory,

    #[error("missing `args` parameter")]
    MissingArguments,

    #[error("no source file among the arguments")]
    NoSourceFile,

    #[error("more than one source file among the arguments")]
    MultipleSourceFiles,
}

/// A validated compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub directory: PathBuf,
    pub file: String,
    /// Engine flags, in the order the client gave them
    pub arguments: Vec<String>,
}

impl CompileRequest {
    /// Build from decoded query pairs. `args` may repeat; `dir` uses its first value.
    pub fn from_query<I, K, V>(pairs: I) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut directory = None;
        let mut tokens = Vec::new();
        for (key, value) in pairs {
            match key.as_ref() {
                DIRECTORY_KEY if directory.is_none() => directory = Some(value.into()),
                ARGUMENTS_KEY => tokens.push(value.into()),
                _ => {}
            }
        }

        let directory = directory.ok_or(RequestError::MissingDirectory)?;
        if tokens.is_empty() {
            return Err(RequestError::MissingArguments);
        }
        let (arguments, file) = split_source_file(tokens)?;

        Ok(Self {
            directory: PathBuf::from(directory),
            file,
            arguments,
        })
    }
}

/// Anything not starting with `-` is taken to be a file name.
pub fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

/// Pull the single non-flag token out of `tokens`, keeping the rest in order.
pub fn split_source_file(mut tokens: Vec<String>) -> Result<(Vec<String>, String), RequestError> {
    let mut files = tokens.iter().enumerate().filter(|(_, t)| !is_flag(t));
    let index = match (files.next(), files.next()) {
        (None, _) => return Err(RequestError::NoSourceFile),
        (Some(_), Some(_)) => return Err(RequestError::MultipleSourceFiles),
        (Some((i, _)), None) => i,
    };
    let file = tokens.remove(index);
    Ok((tokens, file))
}

/// `http://127.0.0.1:<port>/typeset?args=…&dir=<directory>`.
pub fn typeset_url(port: u16, directory: &Path, args: &[String]) -> Url {
    let mut url = base_url(port);
    url.set_path(TYPESET_PATH);
    {
        let mut query = url.query_pairs_mut();
        for arg in args {
            query.append_pair(ARGUMENTS_KEY, arg);
        }
        query.append_pair(DIRECTORY_KEY, &directory.to_string_lossy());
    }
    url
}

pub fn base_url(port: u16) -> Url {
    let mut url = Url::parse("http://127.0.0.1/").expect("static URL is valid");
    let _ = url.set_port(Some(port));
    url
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub engine: String,
    pub started_at: DateTime<Utc>,
    pub cached: Option<CachedDocument>,
    pub cold_runs: u64,
    pub warm_runs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedDocument {
    pub directory: String,
    pub file: String,
    pub arguments: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_file_at_any_position() {
        for tokens in [
            vec!["main.tex", "-a", "--b=1"],
            vec!["-a", "main.tex", "--b=1"],
            vec!["-a", "--b=1", "main.tex"],
        ] {
            let (args, file) = split_source_file(strings(&tokens)).unwrap();
            assert_eq!(file, "main.tex");
            assert_eq!(args, strings(&["-a", "--b=1"]));
        }
    }

    #[test]
    fn test_file_count_must_be_one() {
        assert_eq!(
            split_source_file(strings(&["-a", "--b"])),
            Err(RequestError::NoSourceFile)
        );
        for tokens in [
            vec!["a.tex", "b.tex"],
            vec!["a.tex", "-x", "b.tex"],
            vec!["-x", "a.tex", "-y", "b.tex", "c.tex"],
        ] {
            assert_eq!(
                split_source_file(strings(&tokens)),
                Err(RequestError::MultipleSourceFiles)
            );
        }
    }

    #[test]
    fn test_from_query() {
        let pairs = vec![
            ("args", "--interaction=nonstopmode"),
            ("args", "main.tex"),
            ("args", "--shell-escape"),
            ("dir", "/tmp/doc"),
        ];
        let request = CompileRequest::from_query(pairs).unwrap();
        assert_eq!(request.directory, PathBuf::from("/tmp/doc"));
        assert_eq!(request.file, "main.tex");
        assert_eq!(
            request.arguments,
            strings(&["--interaction=nonstopmode", "--shell-escape"])
        );
    }

    #[test]
    fn test_from_query_missing_parameters() {
        assert_eq!(
            CompileRequest::from_query(vec![("args", "main.tex")]),
            Err(RequestError::MissingDirectory)
        );
        assert_eq!(
            CompileRequest::from_query(vec![("dir", "/tmp")]),
            Err(RequestError::MissingArguments)
        );
    }

    #[test]
    fn test_url_round_trips_through_query() {
        let args = strings(&["--jobname=x y", "my file&.tex", "-a=b"]);
        let url = typeset_url(4000, Path::new("/tmp/some dir"), &args);
        assert_eq!(url.path(), TYPESET_PATH);
        assert_eq!(url.port(), Some(4000));

        let request = CompileRequest::from_query(url.query_pairs()).unwrap();
        assert_eq!(request.directory, PathBuf::from("/tmp/some dir"));
        assert_eq!(request.file, "my file&.tex");
        assert_eq!(request.arguments, strings(&["--jobname=x y", "-a=b"]));
    }
}
