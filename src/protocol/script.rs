//! Procedure references: invoke a server-side Lua script by its SHA1 digest,
//! or load its source from disk and send it inline.

use crate::error::{Error, Result};
use crate::protocol::command::Call;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Where a server-side procedure comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcRef {
    /// Digest of a script already loaded into the store (`EVALSHA`)
    Sha1(String),
    /// Script source read from disk on every call (`EVAL`)
    File(PathBuf),
}

impl ProcRef {
    pub fn sha1(digest: impl Into<String>) -> Self {
        ProcRef::Sha1(digest.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ProcRef::File(path.into())
    }

    /// Build a reference from an optional digest and an optional path.
    ///
    /// The digest wins when both are given. Neither (or only empty values)
    /// is a contract violation.
    pub fn from_parts(sha1: Option<&str>, path: Option<&Path>) -> Result<Self> {
        match (sha1, path) {
            (Some(digest), _) if !digest.is_empty() => Ok(ProcRef::sha1(digest)),
            (_, Some(path)) if !path.as_os_str().is_empty() => Ok(ProcRef::file(path)),
            _ => Err(Error::ContractViolation(
                "procedure reference needs a sha1 or a script path".to_string(),
            )),
        }
    }

    /// Resolve into something that can be sent.
    ///
    /// File references are read fresh here; the returned [`Script`] owns the
    /// text and drops it once the caller is done with the call.
    pub fn resolve(&self) -> Result<Script<'_>> {
        match self {
            ProcRef::Sha1(digest) => Ok(Script::Sha1(digest)),
            ProcRef::File(path) => load_script(path)
                .map(Script::Source)
                .map_err(|source| Error::Resource {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

/// A resolved procedure, ready to be turned into `EVALSHA` or `EVAL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script<'a> {
    Sha1(&'a str),
    Source(Bytes),
}

impl Script<'_> {
    /// Invocation with no keys and the given arguments
    pub fn invoke<I>(&self, args: I) -> Call
    where
        I: IntoIterator<Item = Bytes>,
    {
        let (verb, body): (&'static [u8], Bytes) = match self {
            Script::Sha1(digest) => (b"EVALSHA", Bytes::copy_from_slice(digest.as_bytes())),
            Script::Source(text) => (b"EVAL", text.clone()),
        };
        let mut parts = vec![Bytes::from_static(verb), body, Bytes::from_static(b"0")];
        parts.extend(args);
        Call::new(parts)
    }
}

fn load_script(path: &Path) -> io::Result<Bytes> {
    let size = std::fs::metadata(path)?.len() as usize;
    let mut text = Vec::new();
    text.try_reserve_exact(size)
        .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
    File::open(path)?.read_to_end(&mut text)?;
    Ok(Bytes::from(text))
}
