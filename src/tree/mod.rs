//! The resource tree: a hierarchical namespace of entries.
//!
//! The tree owns its entries (`Rc` children, `Weak` parents), entries own
//! their resource record, and resources own their sample references; routing
//! edges between resources are non-owning so no reference cycle can form.
//!
//! Deleted entries stay linked to their parent but are invisible to default
//! iteration; only snapshot passes asking for deleted entries see them, and
//! a flush reaps them. Structural mutations are fenced by an advisory
//! update-pause counter held by the snapshot engine.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::{HubError, Result};
use crate::resource::Resource;
use crate::sample::{now, Timestamp};

/// The kind of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryType {
    /// Interior naming node with no resource attached.
    Namespace,
    /// Producer-declared resource.
    Input,
    /// Consumer-declared resource.
    Output,
    /// Administratively created filtering/routing resource.
    Observation,
    /// Entry retaining administrative settings after its resource was
    /// deleted (or configured before the resource ever existed).
    Placeholder,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntryType::Namespace => "namespace",
            EntryType::Input => "input",
            EntryType::Output => "output",
            EntryType::Observation => "observation",
            EntryType::Placeholder => "placeholder",
        };
        f.write_str(name)
    }
}

/// Shared handle to a tree entry.
pub type EntryRef = Rc<Entry>;

/// One node of the resource tree.
pub struct Entry {
    name: String,
    parent: Weak<Entry>,
    children: RefCell<Vec<EntryRef>>,
    kind: Cell<EntryType>,
    resource: RefCell<Option<Resource>>,
    stamp: Cell<Timestamp>,
    is_new: Cell<bool>,
    is_deleted: Cell<bool>,
    is_relevant: Cell<bool>,
    is_mandatory: Cell<bool>,
}

impl Entry {
    fn new(name: &str, parent: Weak<Entry>) -> EntryRef {
        Rc::new(Entry {
            name: name.to_string(),
            parent,
            children: RefCell::new(Vec::new()),
            kind: Cell::new(EntryType::Namespace),
            resource: RefCell::new(None),
            stamp: Cell::new(now()),
            is_new: Cell::new(true),
            is_deleted: Cell::new(false),
            is_relevant: Cell::new(false),
            is_mandatory: Cell::new(false),
        })
    }

    /// The entry's name (unique among its live siblings).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry's kind.
    pub fn kind(&self) -> EntryType {
        self.kind.get()
    }

    pub(crate) fn set_kind(&self, kind: EntryType) {
        self.kind.set(kind);
        self.touch();
    }

    /// The parent entry, or `None` for the root.
    pub fn parent(&self) -> Option<EntryRef> {
        self.parent.upgrade()
    }

    pub(crate) fn resource(&self) -> Ref<'_, Option<Resource>> {
        self.resource.borrow()
    }

    pub(crate) fn resource_mut(&self) -> RefMut<'_, Option<Resource>> {
        self.resource.borrow_mut()
    }

    /// First child visible under the given deletion-visibility rule.
    pub fn first_child_ex(&self, include_deleted: bool) -> Option<EntryRef> {
        self.children
            .borrow()
            .iter()
            .find(|c| include_deleted || !c.is_deleted())
            .cloned()
    }

    /// Next sibling visible under the given deletion-visibility rule.
    pub fn next_sibling_ex(self: &Rc<Self>, include_deleted: bool) -> Option<EntryRef> {
        let parent = self.parent.upgrade()?;
        let children = parent.children.borrow();
        let mut found_self = false;
        for child in children.iter() {
            if found_self && (include_deleted || !child.is_deleted()) {
                return Some(child.clone());
            }
            if Rc::ptr_eq(child, self) {
                found_self = true;
            }
        }
        None
    }

    /// Finds a live (non-deleted) child by name.
    pub fn find_child(&self, name: &str) -> Option<EntryRef> {
        self.children
            .borrow()
            .iter()
            .find(|c| !c.is_deleted() && c.name == name)
            .cloned()
    }

    /// Absolute path of this entry from the tree root.
    pub fn absolute_path(&self) -> String {
        let mut segments = Vec::new();
        let mut cursor = self.parent.upgrade();
        if cursor.is_some() {
            segments.push(self.name.clone());
        }
        while let Some(entry) = cursor {
            if let Some(parent) = entry.parent() {
                segments.push(entry.name.clone());
                cursor = Some(parent);
            } else {
                cursor = None;
            }
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// Time of the most recent change to this entry: the larger of its own
    /// mutation stamp and its current value's timestamp.
    pub fn last_modified(&self) -> Timestamp {
        let own = self.stamp.get();
        let value_ts = self
            .resource
            .borrow()
            .as_ref()
            .and_then(|res| res.current())
            .map(|sample| sample.timestamp());
        match value_ts {
            Some(ts) if ts > own => ts,
            _ => own,
        }
    }

    /// Records a structural or administrative mutation on this entry.
    pub(crate) fn touch(&self) {
        self.stamp.set(now());
    }

    /// Whether this entry was created since the last snapshot cleared it.
    pub fn is_new(&self) -> bool {
        self.is_new.get()
    }

    /// Clears the newness flag; set again by the next structural change.
    pub fn clear_newness(&self) {
        self.is_new.set(false);
    }

    pub(crate) fn mark_new(&self) {
        self.is_new.set(true);
        self.touch();
    }

    /// Whether this entry carries a deletion record.
    pub fn is_deleted(&self) -> bool {
        self.is_deleted.get()
    }

    pub(crate) fn set_deleted(&self) {
        self.is_deleted.set(true);
        self.touch();
    }

    /// Per-pass snapshot relevance flag.
    pub fn is_relevant(&self) -> bool {
        self.is_relevant.get()
    }

    pub(crate) fn set_relevance(&self, relevant: bool) {
        self.is_relevant.set(relevant);
    }

    /// Whether the entry is flagged mandatory (surfaced in snapshots).
    pub fn is_mandatory(&self) -> bool {
        self.is_mandatory.get()
    }

    pub(crate) fn set_mandatory(&self, mandatory: bool) {
        self.is_mandatory.set(mandatory);
        self.touch();
    }

    /// Detaches `child` from its parent entirely. Used when deletion
    /// tracking is off or when a tracked deletion is flushed.
    pub(crate) fn unlink(child: &EntryRef) {
        if let Some(parent) = child.parent() {
            parent
                .children
                .borrow_mut()
                .retain(|c| !Rc::ptr_eq(c, child));
            trace!(path = %child.absolute_path(), "tree.entry.unlinked");
        }
    }
}

/// The hub's resource tree.
pub struct Tree {
    root: EntryRef,
    pause_depth: Cell<u32>,
}

impl Tree {
    pub(crate) fn new() -> Self {
        let root = Entry::new("", Weak::new());
        // The root is permanent, not an observable creation.
        root.is_new.set(false);
        Self {
            root,
            pause_depth: Cell::new(0),
        }
    }

    /// The root entry.
    pub fn root(&self) -> EntryRef {
        self.root.clone()
    }

    /// Resolves an absolute path (leading slash required) to a live entry.
    pub fn find_at_absolute_path(&self, path: &str) -> Result<EntryRef> {
        let rest = path
            .strip_prefix('/')
            .ok_or(HubError::BadParameter("path must be absolute"))?;
        let mut entry = self.root.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            entry = entry.find_child(segment).ok_or(HubError::NotFound)?;
        }
        Ok(entry)
    }

    /// Resolves an absolute path, creating missing namespace entries along
    /// the way.
    pub(crate) fn get_or_create(&self, path: &str) -> Result<EntryRef> {
        let rest = path
            .strip_prefix('/')
            .ok_or(HubError::BadParameter("path must be absolute"))?;
        let mut entry = self.root.clone();
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            entry = match entry.find_child(segment) {
                Some(child) => child,
                None => {
                    let child = Entry::new(segment, Rc::downgrade(&entry));
                    entry.children.borrow_mut().push(child.clone());
                    trace!(path = %child.absolute_path(), "tree.entry.created");
                    child
                }
            };
        }
        Ok(entry)
    }

    /// Pauses structural updates for the duration of a snapshot pass.
    pub(crate) fn start_update(&self) {
        self.pause_depth.set(self.pause_depth.get() + 1);
        trace!(depth = self.pause_depth.get(), "tree.update.paused");
    }

    /// Resumes structural updates.
    pub(crate) fn end_update(&self) {
        let depth = self.pause_depth.get();
        debug_assert!(depth > 0, "unbalanced end_update");
        self.pause_depth.set(depth.saturating_sub(1));
        trace!(depth = self.pause_depth.get(), "tree.update.resumed");
    }

    /// Whether updates are currently paused.
    pub(crate) fn is_update_paused(&self) -> bool {
        self.pause_depth.get() > 0
    }
}
