//! Heap Graph Scanner - Reference Discovery Within Objects
//!
//! The scanner walks one object at a time and emits every reference edge
//! whose target is part of the [`WorkingSnapshot`]. Reference fields are read
//! directly; inline value-type fields and value arrays are expanded
//! recursively, since an embedded struct may itself hold references.
//!
//! # Exclusion
//!
//! Every scan returns whether the scanned type *can* hold references. A type
//! that cannot is added to the catalog's exclusion set, and every later
//! encounter in the same dump skips it without touching reflection. A
//! reference-typed field always counts, even when null in the instance at
//! hand. Any doubt (unreadable value, unknown footprint, recursion cut off)
//! also counts as "may hold references", so a type is only excluded when a
//! full walk of its field closure found none.
//!
//! # Recursion bound
//!
//! Value expansion keeps the chain of types currently being expanded. A
//! value field whose type is already on the chain is not expanded. Depth
//! counts embedded values only: the object or static block holding a field
//! is level zero, so instance and static fields see the same limit.
//!
//! # Edge attribution
//!
//! Edges found inside an embedded value are recorded against the outermost
//! field holding that value (`context_field`), so analysis tools see the
//! field of the object that actually owns the reference.

use crate::catalog::{TypeCatalog, TypeInfo};
use crate::config::DumpConfig;
use crate::error::Result;
use crate::format::{SnapshotCounts, SnapshotWriter};
use crate::runtime::{
    DomainId, FieldDescriptor, FieldId, FieldKind, HeapRuntime, ObjectId, TypeId, TypeShape,
};
use crate::stats::ScanStats;
use crate::tracker::WorkingSnapshot;
use std::io::{Seek, Write};

/// Tunables of one scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Storage width of one reference; smaller values cannot embed one
    pub reference_width: usize,
    /// Maximum depth of nested value-type expansion
    pub max_value_depth: usize,
    /// Skip static storage of types whose name contains a backtick
    pub skip_open_generic_statics: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&DumpConfig::default())
    }
}

impl From<&DumpConfig> for ScanOptions {
    fn from(config: &DumpConfig) -> Self {
        Self {
            reference_width: config.reference_width,
            max_value_depth: config.max_value_depth,
            skip_open_generic_statics: config.skip_open_generic_statics,
        }
    }
}

/// Walks objects and static roots, writing records and edges
pub struct HeapScanner<'a, R, W>
where
    R: HeapRuntime + ?Sized,
    W: Write + Seek,
{
    runtime: &'a R,
    snapshot: &'a WorkingSnapshot,
    catalog: TypeCatalog,
    writer: SnapshotWriter<W>,
    options: ScanOptions,
    stats: ScanStats,
    chain: Vec<TypeId>,
    value_depth: usize,
    refs_in_record: usize,
}

impl<'a, R, W> HeapScanner<'a, R, W>
where
    R: HeapRuntime + ?Sized,
    W: Write + Seek,
{
    /// Create a scanner with a fresh catalog over an open writer
    pub fn new(
        runtime: &'a R,
        snapshot: &'a WorkingSnapshot,
        writer: SnapshotWriter<W>,
        options: ScanOptions,
    ) -> Self {
        Self {
            runtime,
            snapshot,
            catalog: TypeCatalog::new(),
            writer,
            options,
            stats: ScanStats::new(),
            chain: Vec::new(),
            value_depth: 0,
            refs_in_record: 0,
        }
    }

    /// Write one tracked object and its outgoing edges
    pub fn write_object(&mut self, obj: ObjectId, ty: TypeId) -> Result<()> {
        let (info, _) = self.catalog.resolve_or_register(self.runtime, ty);
        let size = self.runtime.object_size(obj);
        self.writer.begin_object(Some(obj), &info, size)?;
        self.stats.objects_scanned += 1;
        self.refs_in_record = 0;

        if self.catalog.is_excluded(ty) {
            self.stats.exclusion_hits += 1;
        } else if let Some(storage) = self.runtime.object_storage(obj) {
            if info.shape.is_array() {
                self.scan_array(&storage, ty)?;
            } else {
                self.scan_object(&storage, ty, None)?;
            }
        } else {
            log::debug!("No storage for object {} of {}", obj, info.name);
        }

        self.writer.end_object()?;
        self.stats.record(self.refs_in_record);
        Ok(())
    }

    /// Write the static pseudo-object of `ty` within `domain`
    ///
    /// Returns false when the type has nothing to write: no static fields,
    /// a skipped open generic, or no static storage in this domain.
    pub fn write_static_roots(&mut self, domain: DomainId, ty: TypeId) -> Result<bool> {
        let (info, _) = self.catalog.resolve_or_register(self.runtime, ty);
        if !info.has_static_fields() {
            return Ok(false);
        }
        if self.options.skip_open_generic_statics && info.name.contains('`') {
            log::trace!("Skipping statics of open generic {}", info.name);
            return Ok(false);
        }
        let storage = match self.runtime.static_storage(domain, ty) {
            Some(storage) => storage,
            None => return Ok(false),
        };

        self.writer.begin_object(None, &info, 0)?;
        self.stats.static_roots += 1;
        self.refs_in_record = 0;

        for field in info.static_fields() {
            match field.kind {
                FieldKind::Reference => {
                    let target = self.runtime.read_reference(&storage, field);
                    self.emit_edge(target, Some(field.id))?;
                }
                FieldKind::Value(value_ty) => {
                    self.scan_value_field(&storage, field, value_ty, None)?;
                }
            }
        }

        self.writer.end_object()?;
        self.stats.record(self.refs_in_record);
        Ok(true)
    }

    /// Scan the instance fields of `storage`, laid out as `ty`
    ///
    /// Edges go to the currently open record, attributed to `context_field`
    /// when set. Returns whether the type may hold references; a negative
    /// verdict adds `ty` to the exclusion set.
    pub fn scan_object(
        &mut self,
        storage: &R::Storage,
        ty: TypeId,
        context_field: Option<FieldId>,
    ) -> Result<bool> {
        let (info, _) = self.catalog.resolve_or_register(self.runtime, ty);
        if info.shape.is_array() {
            return self.scan_array(storage, ty);
        }

        self.chain.push(ty);
        let scanned = self.scan_instance_fields(storage, &info, context_field);
        self.chain.pop();
        let contains = scanned?;

        if !contains && self.catalog.mark_excluded(ty) {
            self.stats.types_excluded += 1;
        }
        Ok(contains)
    }

    fn scan_instance_fields(
        &mut self,
        storage: &R::Storage,
        info: &TypeInfo,
        context_field: Option<FieldId>,
    ) -> Result<bool> {
        let mut contains = false;
        for field in info.instance_fields() {
            match field.kind {
                FieldKind::Reference => {
                    contains = true;
                    let target = self.runtime.read_reference(storage, field);
                    self.emit_edge(target, Some(context_field.unwrap_or(field.id)))?;
                }
                FieldKind::Value(value_ty) => {
                    if self.scan_value_field(storage, field, value_ty, context_field)? {
                        contains = true;
                    }
                }
            }
        }
        Ok(contains)
    }

    /// Expand one value-typed field; returns whether it may hold references
    fn scan_value_field(
        &mut self,
        storage: &R::Storage,
        field: &FieldDescriptor,
        value_ty: TypeId,
        context_field: Option<FieldId>,
    ) -> Result<bool> {
        if self.catalog.is_excluded(value_ty) {
            self.stats.exclusion_hits += 1;
            return Ok(false);
        }

        let size = match self.runtime.value_size(value_ty) {
            Some(size) => size,
            None => return Ok(true),
        };
        if size < self.options.reference_width {
            return Ok(false);
        }

        if self.chain.contains(&value_ty) || self.value_depth >= self.options.max_value_depth {
            self.stats.recursion_cutoffs += 1;
            log::debug!(
                "Not expanding field {} of value type {} at depth {}",
                field.name,
                value_ty,
                self.value_depth
            );
            return Ok(true);
        }

        let value = match self.runtime.read_value(storage, field) {
            Some(value) => value,
            None => return Ok(true),
        };
        self.stats.value_scans += 1;
        self.value_depth += 1;
        let scanned = self.scan_object(&value, value_ty, Some(context_field.unwrap_or(field.id)));
        self.value_depth -= 1;
        scanned
    }

    /// Scan the elements of an array object laid out as `ty`
    ///
    /// Reference arrays always count as holding references. Value arrays are
    /// marked excluded only on a negative verdict; an empty array or an
    /// unknown element size gives none.
    pub fn scan_array(&mut self, storage: &R::Storage, ty: TypeId) -> Result<bool> {
        let (info, _) = self.catalog.resolve_or_register(self.runtime, ty);
        let element = match info.shape {
            TypeShape::Array { element } => element,
            TypeShape::Object => return self.scan_object(storage, ty, None),
        };

        let len = self.runtime.array_length(storage);
        let element_ty = match element {
            FieldKind::Reference => {
                for index in 0..len {
                    let target = self.runtime.read_element_reference(storage, index);
                    self.emit_edge(target, None)?;
                }
                return Ok(true);
            }
            FieldKind::Value(element_ty) => element_ty,
        };

        let verdict = if self.catalog.is_excluded(element_ty) {
            self.stats.exclusion_hits += 1;
            Some(false)
        } else {
            let size = self
                .runtime
                .array_element_size(ty)
                .or_else(|| self.runtime.value_size(element_ty));
            match size {
                None => None,
                Some(size) if size < self.options.reference_width => Some(false),
                Some(_) => self.scan_value_elements(storage, element_ty, len)?,
            }
        };

        match verdict {
            Some(false) => {
                if self.catalog.mark_excluded(ty) {
                    self.stats.types_excluded += 1;
                }
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn scan_value_elements(
        &mut self,
        storage: &R::Storage,
        element_ty: TypeId,
        len: usize,
    ) -> Result<Option<bool>> {
        let mut verdict = None;
        for index in 0..len {
            let element = match self.runtime.read_element_value(storage, index) {
                Some(element) => element,
                None => continue,
            };
            self.stats.value_scans += 1;
            self.value_depth += 1;
            let scanned = self.scan_object(&element, element_ty, None);
            self.value_depth -= 1;
            if scanned? {
                verdict = Some(true);
            } else {
                // One negative verdict holds for every element of the type
                return Ok(Some(false));
            }
        }
        Ok(verdict)
    }

    fn emit_edge(&mut self, target: Option<ObjectId>, field: Option<FieldId>) -> Result<()> {
        let target = match target {
            Some(target) => target,
            None => return Ok(()),
        };
        if self.snapshot.contains(target) {
            self.writer.add_reference(target, field)?;
            self.stats.references_emitted += 1;
            self.refs_in_record += 1;
        } else {
            self.stats.references_untracked += 1;
        }
        Ok(())
    }

    /// Catalog built so far
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// Statistics so far
    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Close the writer and return the sink, final counts and statistics
    pub fn finish(self) -> Result<(W, SnapshotCounts, ScanStats)> {
        let (out, counts) = self.writer.close()?;
        Ok((out, counts, self.stats))
    }
}
