//! # Table of contents model
//!
//! At connection time the device advertises a table of contents for its
//! log variables and one for its parameters: grouped, typed elements with
//! dense identifiers and a CRC over the whole table. Downloading a TOC
//! element by element is slow over the radio, so complete tables are
//! persisted to disk keyed by their CRC and reused on the next boot.

use std::fs;
use std::path::PathBuf;

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One named, typed entry of a table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TocElement<I> {
    pub ident: u16,
    pub name: String,
    pub info: I,
}

/// The elements sharing one group name, in download order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TocGroup<I> {
    pub name: String,
    pub elements: Vec<TocElement<I>>,
}

/// A table of contents: a CRC and its groups of elements.
///
/// `(group, name)` pairs and identifiers are unique; identifiers are dense
/// from 0 once the table is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Toc<I> {
    pub crc: u32,
    pub groups: Vec<TocGroup<I>>,
    #[serde(skip)]
    pub complete: bool,
}

impl<I> Default for Toc<I> {
    fn default() -> Self {
        Toc {
            crc: 0,
            groups: Vec::new(),
            complete: false,
        }
    }
}

impl<I> Toc<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.crc = 0;
        self.complete = false;
    }

    /// Insert an element under its group. Duplicate `(group, name)` pairs
    /// and duplicate identifiers are ignored.
    pub fn add_element(&mut self, ident: u16, group: &str, name: &str, info: I) {
        if self.get_element_by_id(ident).is_some() || self.get_element(group, name).is_some() {
            debug!("ignoring duplicate TOC element {}.{}", group, name);
            return;
        }
        match self.groups.iter_mut().find(|g| g.name == group) {
            Some(group) => group.elements.push(TocElement {
                ident,
                name: name.to_owned(),
                info,
            }),
            None => self.groups.push(TocGroup {
                name: group.to_owned(),
                elements: vec![TocElement {
                    ident,
                    name: name.to_owned(),
                    info,
                }],
            }),
        }
    }

    pub fn get_element(&self, group: &str, name: &str) -> Option<&TocElement<I>> {
        self.groups
            .iter()
            .find(|g| g.name == group)?
            .elements
            .iter()
            .find(|e| e.name == name)
    }

    /// Look up an element by its "group.name" form.
    pub fn get_element_by_complete_name(&self, complete_name: &str) -> Option<&TocElement<I>> {
        let (group, name) = complete_name.split_once('.')?;
        self.get_element(group, name)
    }

    pub fn get_element_by_id(&self, ident: u16) -> Option<&TocElement<I>> {
        self.groups
            .iter()
            .flat_map(|g| g.elements.iter())
            .find(|e| e.ident == ident)
    }

    pub fn element_id(&self, complete_name: &str) -> Option<u16> {
        self.get_element_by_complete_name(complete_name)
            .map(|e| e.ident)
    }

    /// Total number of elements.
    pub fn id_count(&self) -> usize {
        self.groups.iter().map(|g| g.elements.len()).sum()
    }

    /// Every "group.name" in the table, in download order.
    pub fn complete_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| {
                g.elements
                    .iter()
                    .map(move |e| format!("{}.{}", g.name, e.name))
            })
            .collect()
    }

    pub fn elements(&self) -> impl Iterator<Item = (&TocGroup<I>, &TocElement<I>)> {
        self.groups
            .iter()
            .flat_map(|g| g.elements.iter().map(move |e| (g, e)))
    }

    /// True when identifiers cover exactly `0..id_count()`.
    fn idents_dense(&self) -> bool {
        let count = self.id_count();
        let mut seen = vec![false; count];
        for (_, element) in self.elements() {
            match seen.get_mut(element.ident as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return false,
            }
        }
        true
    }
}

/// On-disk cache of complete TOCs, one JSON file per CRC.
///
/// Files live under `<dir>/TocCache/` and are named
/// `<CRC32 as 8 upper-case hex digits>_toc.json`. The cache directory is
/// injected by the connection owner; a disabled cache turns every
/// operation into a no-op. Read and write failures are logged and
/// swallowed: the fetcher falls back to a full download or simply skips
/// persistence.
#[derive(Debug, Clone, Default)]
pub struct TocCache {
    dir: Option<PathBuf>,
}

const TOC_CACHE_FOLDER: &str = "TocCache";

impl TocCache {
    /// Cache TOCs under `<dir>/TocCache/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        TocCache {
            dir: Some(dir.into()),
        }
    }

    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        TocCache { dir: None }
    }

    fn file_path(&self, crc: u32) -> Option<PathBuf> {
        let mut path = self.dir.clone()?;
        path.push(TOC_CACHE_FOLDER);
        path.push(format!("{:08X}_toc.json", crc));
        Some(path)
    }

    /// Load the TOC cached for `crc`. Returns `None` when no valid cache
    /// entry exists; malformed or inconsistent files are rejected.
    pub(crate) fn read<I>(&self, crc: u32) -> Option<Toc<I>>
    where
        I: DeserializeOwned,
    {
        let path = self.file_path(crc)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not read TOC cache {}: {}", path.display(), e);
                }
                return None;
            }
        };
        let mut toc: Toc<I> = match serde_json::from_str(&content) {
            Ok(toc) => toc,
            Err(e) => {
                warn!("rejecting malformed TOC cache {}: {}", path.display(), e);
                return None;
            }
        };
        if toc.crc != crc || !toc.idents_dense() {
            warn!("rejecting inconsistent TOC cache {}", path.display());
            return None;
        }
        toc.complete = true;
        info!("TOC read from cache ({:08X}, {} items)", crc, toc.id_count());
        Some(toc)
    }

    /// Persist a complete TOC under its CRC. Failures are logged only.
    pub(crate) fn write<I>(&self, crc: u32, toc: &Toc<I>)
    where
        I: Serialize,
    {
        let Some(path) = self.file_path(crc) else {
            return;
        };
        let folder = path.parent().expect("cache path always has a parent");
        if let Err(e) = fs::create_dir_all(folder) {
            warn!("could not create {}: {}", folder.display(), e);
            return;
        }
        let content = match serde_json::to_string_pretty(toc) {
            Ok(content) => content,
            Err(e) => {
                warn!("could not serialize TOC {:08X}: {}", crc, e);
                return;
            }
        };
        match fs::write(&path, content) {
            Ok(()) => info!("wrote TOC cache {}", path.display()),
            Err(e) => warn!("could not write TOC cache {}: {}", path.display(), e),
        }
    }
}
