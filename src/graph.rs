//! Structural export of the registered-network hierarchy.
//!
//! Branch-only nodes are skipped: every registered network is linked to its
//! nearest registered ancestor, the same node a lookup would fall back to.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ipnet::IpNet;
use tracing::debug;

use crate::error::Result;
use crate::node::NodeId;
use crate::NetDb;

/// One registered network in the structural export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vertex {
    /// Stable identifier while the database is not mutated.
    pub id: usize,
    pub network: IpNet,
    /// Identifier of the nearest registered ancestor.
    pub parent: Option<usize>,
}

/// Graphviz attributes written in the `digraph` header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DotOptions {
    pub ratio: String,
    pub ranksep: String,
    pub fontname: String,
    pub fontsize: String,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            ratio: "auto".into(),
            ranksep: "3".into(),
            fontname: "courrier".into(),
            fontsize: "8".into(),
        }
    }
}

impl<V> NetDb<V> {
    /// Registered networks in trie order, each linked to its nearest
    /// registered ancestor.
    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.walk().filter_map(move |id| {
            let (network, _) = self.entry(id)?;
            let parent = self
                .nearest_registered(self.nodes.get(id).parent)
                .map(NodeId::index);
            Some(Vertex {
                id: id.index(),
                network,
                parent,
            })
        })
    }

    /// Write the hierarchy as a Graphviz `digraph`.
    pub fn write_dot<W: Write>(&self, mut w: W, opts: &DotOptions) -> io::Result<()> {
        writeln!(w, "digraph G {{")?;
        writeln!(w, "\tratio=\"{}\";", opts.ratio)?;
        writeln!(w, "\tranksep=\"{}\";", opts.ranksep)?;
        writeln!(
            w,
            "\tnode [fontname=\"{}\", fontsize=\"{}\"];",
            opts.fontname, opts.fontsize
        )?;
        for v in self.vertices() {
            writeln!(w, "\tn{} [label=\"{}\"];", v.id, v.network)?;
            if let Some(parent) = v.parent {
                writeln!(w, "\tn{}->n{};", parent, v.id)?;
            }
        }
        writeln!(w, "}}")
    }

    /// Write the hierarchy to `path` with default options, replacing any
    /// existing file.
    pub fn graph(&self, path: impl AsRef<Path>) -> Result<()> {
        self.graph_with(path, &DotOptions::default())
    }

    pub fn graph_with(&self, path: impl AsRef<Path>, opts: &DotOptions) -> Result<()> {
        let path = path.as_ref();
        let mut w = BufWriter::new(File::create(path)?);
        self.write_dot(&mut w, opts)?;
        w.flush()?;
        debug!(path = %path.display(), networks = self.len(), "wrote graph");
        Ok(())
    }
}
