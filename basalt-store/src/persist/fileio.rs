//! Data-file writing and recovery.
//!
//! Writing serialises a snapshot view of both partitions into the scratch
//! sync-file, fsyncs it, and atomically renames it onto the data-file, so a
//! crash mid-write never corrupts the previous image. Recovery replays the
//! data-file's term declarations and statements into the store through
//! isolation-free sinks; file-local term ids are remapped through the live
//! interner.

use crate::persist::format::{self, RecordTag};
use crate::source::{Dataset, Sink};
use crate::terms::TermRegistry;
use basalt_core::{Error, Pattern, Result, Statement, Term, TermId};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Counters from a completed snapshot write.
pub(crate) struct WriteStats {
    pub terms: usize,
    pub statements: usize,
}

/// Counters from a completed recovery replay.
pub(crate) struct ReadStats {
    pub terms: usize,
    pub statements: usize,
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::io(format!("{context} {}", path.display()), e)
}

/// Write a snapshot of both partitions to `sync_path`, then atomically
/// rename it onto `data_path`.
pub(crate) fn write_snapshot(
    sync_path: &Path,
    data_path: &Path,
    terms: &TermRegistry,
    explicit: &Dataset,
    inferred: &Dataset,
) -> Result<WriteStats> {
    let explicit_statements: Vec<Statement> = explicit.scan(Pattern::any())?.collect();
    let inferred_statements: Vec<Statement> = inferred.scan(Pattern::any())?.collect();

    // Term closure: every term referenced by a statement, plus the
    // datatypes of referenced literals.
    let mut used: FxHashSet<TermId> = FxHashSet::default();
    for st in explicit_statements.iter().chain(&inferred_statements) {
        used.insert(st.subject);
        used.insert(st.predicate);
        used.insert(st.object);
        if let Some(c) = st.context {
            used.insert(c);
        }
    }
    let mut datatypes = Vec::new();
    for &id in &used {
        if let Some(Term::Literal {
            datatype: Some(dt), ..
        }) = terms.term(id)
        {
            datatypes.push(dt);
        }
    }
    used.extend(datatypes);

    let mut term_ids: Vec<TermId> = used.into_iter().collect();
    term_ids.sort_unstable();

    // Namespaces referenced by the written IRIs, in id order.
    let mut used_ns: FxHashSet<u32> = FxHashSet::default();
    for &id in &term_ids {
        if let Some(Term::Iri { namespace, .. }) = terms.term(id) {
            let ns_id = terms
                .namespace_id(&namespace)
                .expect("interned IRI has an interned namespace");
            used_ns.insert(ns_id);
        }
    }
    let namespaces: Vec<(u32, std::sync::Arc<str>)> = terms
        .namespaces()
        .into_iter()
        .filter(|(id, _)| used_ns.contains(id))
        .collect();

    let file = File::create(sync_path).map_err(|e| io_err("creating sync file", sync_path, e))?;
    let mut w = BufWriter::new(file);
    let result = write_records(
        &mut w,
        terms,
        &namespaces,
        &term_ids,
        &explicit_statements,
        &inferred_statements,
    );
    result.map_err(|e| io_err("writing sync file", sync_path, e))?;

    w.flush()
        .map_err(|e| io_err("flushing sync file", sync_path, e))?;
    let file = w
        .into_inner()
        .map_err(|e| io_err("flushing sync file", sync_path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| io_err("fsyncing sync file", sync_path, e))?;
    drop(file);

    std::fs::rename(sync_path, data_path)
        .map_err(|e| io_err("renaming sync file onto", data_path, e))?;

    let stats = WriteStats {
        terms: term_ids.len(),
        statements: explicit_statements.len() + inferred_statements.len(),
    };
    debug!(
        terms = stats.terms,
        statements = stats.statements,
        path = %data_path.display(),
        "snapshot written"
    );
    Ok(stats)
}

fn write_records<W: Write>(
    w: &mut W,
    terms: &TermRegistry,
    namespaces: &[(u32, std::sync::Arc<str>)],
    term_ids: &[TermId],
    explicit: &[Statement],
    inferred: &[Statement],
) -> std::io::Result<()> {
    w.write_all(&format::MAGIC)?;
    format::write_u8(w, format::FORMAT_VERSION)?;

    for (id, text) in namespaces {
        format::write_u8(w, RecordTag::Namespace as u8)?;
        format::write_varint(w, u64::from(*id))?;
        format::write_string(w, text)?;
    }

    for &id in term_ids {
        let term = terms
            .term(id)
            .ok_or_else(|| format::corrupt("statement references an unknown term"))?;
        match term {
            Term::Iri { namespace, local } => {
                let ns_id = terms
                    .namespace_id(&namespace)
                    .ok_or_else(|| format::corrupt("IRI namespace missing from dictionary"))?;
                format::write_u8(w, RecordTag::Uri as u8)?;
                format::write_varint(w, u64::from(id.as_u32()))?;
                format::write_varint(w, u64::from(ns_id))?;
                format::write_string(w, &local)?;
            }
            Term::Blank { id: label } => {
                format::write_u8(w, RecordTag::Bnode as u8)?;
                format::write_varint(w, u64::from(id.as_u32()))?;
                format::write_string(w, &label)?;
            }
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => {
                format::write_u8(w, RecordTag::Literal as u8)?;
                format::write_varint(w, u64::from(id.as_u32()))?;
                let mut flags = 0u8;
                if lang.is_some() {
                    flags |= format::LITERAL_HAS_LANG;
                }
                if datatype.is_some() {
                    flags |= format::LITERAL_HAS_DATATYPE;
                }
                format::write_u8(w, flags)?;
                format::write_string(w, &lexical)?;
                if let Some(lang) = &lang {
                    format::write_string(w, lang)?;
                }
                if let Some(dt) = datatype {
                    format::write_varint(w, u64::from(dt.as_u32()))?;
                }
            }
        }
    }

    for (statements, explicit_flag) in [(explicit, true), (inferred, false)] {
        for st in statements {
            format::write_u8(w, RecordTag::Statement as u8)?;
            format::write_varint(w, u64::from(st.subject.as_u32()))?;
            format::write_varint(w, u64::from(st.predicate.as_u32()))?;
            format::write_varint(w, u64::from(st.object.as_u32()))?;
            format::write_varint(
                w,
                format::encode_context(st.context.map(|c| u64::from(c.as_u32()))),
            )?;
            let flags = if explicit_flag {
                format::STATEMENT_EXPLICIT
            } else {
                0
            };
            format::write_u8(w, flags)?;
        }
    }

    format::write_u8(w, RecordTag::Eof as u8)
}

/// Replay a data-file into the store through the given sinks.
pub(crate) fn read_snapshot(
    data_path: &Path,
    terms: &TermRegistry,
    explicit: &mut Sink,
    inferred: &mut Sink,
) -> Result<ReadStats> {
    let file = File::open(data_path).map_err(|e| io_err("opening data file", data_path, e))?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|e| io_err("reading data file header", data_path, e))?;
    if magic != format::MAGIC {
        return Err(io_err(
            "reading data file",
            data_path,
            format::corrupt("bad magic"),
        ));
    }
    let version =
        format::read_u8(&mut r).map_err(|e| io_err("reading data file header", data_path, e))?;
    if version != format::FORMAT_VERSION {
        return Err(io_err(
            "reading data file",
            data_path,
            format::corrupt(format!("unsupported format version {version}")),
        ));
    }

    let stats = replay_records(&mut r, terms, explicit, inferred)
        .map_err(|e| io_err("reading data file", data_path, e))?;
    debug!(
        terms = stats.terms,
        statements = stats.statements,
        path = %data_path.display(),
        "data file replayed"
    );
    Ok(stats)
}

fn resolve(map: &FxHashMap<u64, TermId>, file_id: u64) -> std::io::Result<TermId> {
    map.get(&file_id)
        .copied()
        .ok_or_else(|| format::corrupt(format!("undeclared term id {file_id}")))
}

fn replay_records<R: Read>(
    r: &mut R,
    terms: &TermRegistry,
    explicit: &mut Sink,
    inferred: &mut Sink,
) -> std::io::Result<ReadStats> {
    let mut ns_map: FxHashMap<u64, String> = FxHashMap::default();
    let mut term_map: FxHashMap<u64, TermId> = FxHashMap::default();
    let mut statements = 0usize;

    // Replay errors from the term layer mean the file content is invalid.
    let invalid = |e: Error| format::corrupt(format!("invalid term in data file: {e}"));

    loop {
        let tag_byte = format::read_u8(r)?;
        let tag = RecordTag::from_u8(tag_byte)
            .ok_or_else(|| format::corrupt(format!("unknown record tag {tag_byte:#04x}")))?;
        match tag {
            RecordTag::Eof => break,
            RecordTag::Namespace => {
                let id = format::read_varint(r)?;
                let text = format::read_string(r)?;
                ns_map.insert(id, text);
            }
            RecordTag::Uri => {
                let id = format::read_varint(r)?;
                let ns_id = format::read_varint(r)?;
                let local = format::read_string(r)?;
                let ns = ns_map
                    .get(&ns_id)
                    .ok_or_else(|| format::corrupt(format!("undeclared namespace id {ns_id}")))?;
                let tid = terms.intern_iri_parts(ns, &local).map_err(invalid)?;
                term_map.insert(id, tid);
            }
            RecordTag::Bnode => {
                let id = format::read_varint(r)?;
                let label = format::read_string(r)?;
                let tid = terms.intern_blank(&label).map_err(invalid)?;
                term_map.insert(id, tid);
            }
            RecordTag::Literal => {
                let id = format::read_varint(r)?;
                let flags = format::read_u8(r)?;
                let lexical = format::read_string(r)?;
                let lang = if flags & format::LITERAL_HAS_LANG != 0 {
                    Some(format::read_string(r)?)
                } else {
                    None
                };
                let datatype = if flags & format::LITERAL_HAS_DATATYPE != 0 {
                    Some(resolve(&term_map, format::read_varint(r)?)?)
                } else {
                    None
                };
                let tid = terms
                    .intern_literal(&lexical, lang.as_deref(), datatype)
                    .map_err(invalid)?;
                term_map.insert(id, tid);
            }
            RecordTag::Statement => {
                let s = resolve(&term_map, format::read_varint(r)?)?;
                let p = resolve(&term_map, format::read_varint(r)?)?;
                let o = resolve(&term_map, format::read_varint(r)?)?;
                let c = match format::decode_context(format::read_varint(r)?) {
                    Some(file_id) => Some(resolve(&term_map, file_id)?),
                    None => None,
                };
                let flags = format::read_u8(r)?;
                let sink = if flags & format::STATEMENT_EXPLICIT != 0 {
                    &mut *explicit
                } else {
                    &mut *inferred
                };
                sink.add(s, p, o, c)
                    .map_err(|e| format::corrupt(format!("replay failed: {e}")))?;
                statements += 1;
            }
        }
    }

    Ok(ReadStats {
        terms: term_map.len(),
        statements,
    })
}
