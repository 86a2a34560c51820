use std::cell::RefCell;
use std::rc::{Rc, Weak};

use coppice_base::Result;
use coppice_types::{Id, QName, Value};

use crate::node::NodeObject;

/// The session-side operations a persistent object needs to reach through
/// its back-reference (spec.md §4.7: "every persistent object routes
/// property/child mutations through its owning session"). Defined here
/// rather than in `coppice-session` so `coppice-model` doesn't have to
/// depend on the crate that depends on it; `coppice-session` implements
/// this trait on its internal session handle.
pub trait SessionApi {
    fn ensure_loaded(&self, object: &ObjectRef) -> Result<()>;
    fn set_property(&self, object: &ObjectRef, name: &QName, value: Option<Value>) -> Result<()>;
    fn new_value(&self, list_property: &ObjectRef, name: Option<&str>) -> Result<ObjectRef>;
    fn create_child(&self, container: &ObjectRef, name: &str, type_name: &QName) -> Result<ObjectRef>;
    fn delete_node(&self, object: &ObjectRef) -> Result<()>;
    fn reorder_children(&self, object: &ObjectRef, old_order: Vec<String>, new_order: Vec<String>) -> Result<()>;
    fn checkin(&self, object: &ObjectRef) -> Result<()>;
    fn checkout(&self, object: &ObjectRef) -> Result<()>;
    /// Marks `object` dirty outside the normal mutation API, logging the
    /// "illegal direct mutation" warning spec.md §7 calls for, and leaving a
    /// sentinel on the object that forces the next save to fail (§4.6.3's
    /// dirty flag discipline).
    fn register_direct(&self, object: &ObjectRef);
}

/// A newtype around `Rc<NodeObject>` rather than a bare type alias, kept
/// deliberately so implementing the foreign `coppice_cache::CacheEntry`
/// trait for it is an unambiguous local-type impl rather than relying on
/// `Rc<T>`'s fundamental-type carve-out.
#[derive(Clone)]
pub struct ObjectRef(pub(crate) Rc<NodeObject>);

impl ObjectRef {
    pub(crate) fn new(inner: NodeObject) -> ObjectRef {
        ObjectRef(Rc::new(inner))
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl std::ops::Deref for ObjectRef {
    type Target = NodeObject;
    fn deref(&self) -> &NodeObject {
        &self.0
    }
}

impl coppice_cache::CacheEntry for ObjectRef {
    fn id(&self) -> Id {
        self.0.id()
    }
    fn ghostify(&self) {
        self.0.ghostify();
    }
    fn is_ghost(&self) -> bool {
        self.0.is_ghost()
    }
}

/// Whichever of the two `RefCell`-guarded states a node is in; ghost nodes
/// carry nothing but what's needed to look them up and re-fetch them.
pub(crate) enum DataState {
    Ghost,
    Active(ActiveData),
}

/// A loaded property: either a scalar leaf, or a reference to the complex
/// sub-node implementing it (an `ObjectProperty` or `ListProperty` node
/// per spec.md §3's "value kinds may be complex, delegated to a sub-node").
/// Public (rather than crate-private) because `coppice-session` -- the only
/// intended caller outside this crate -- has to branch on "was this
/// property previously scalar or complex" per spec.md §4.6.1's
/// `set_property` rules; ordinary application code reaches properties
/// through `ObjectRef::get_property`/`get_complex` instead, which already
/// unwrap this for you.
#[derive(Clone)]
pub enum PropertyValue {
    Scalar(Value),
    Complex(ObjectRef),
}

/// What a freshly-unghosted node's children turned out to be, assembled by
/// the session from a wire `NodeState` (spec.md §4.6.2) and handed to
/// [`NodeObject::load_state`] to fold into the object's internal
/// representation. Kept distinct from the crate-private `NodeExtra` so the
/// session never has to name that type.
pub enum LoadedChildren {
    /// An `ObjectProperty` with no child collection at all.
    None,
    /// A `Container`/`ListProperty`'s ordered children, already resolved.
    Ordered {
        entries: Vec<(String, ObjectRef)>,
        orderable: bool,
    },
    /// A `Document`/`Workspace` whose `ecm:children` slot has never been used.
    DocNone,
    /// A `Document`/`Workspace` whose `ecm:children` slot is already a node.
    DocMaterialized(ObjectRef),
}

/// An ordered group of named children, shared by `Container` and by the
/// materialized form of a `ListProperty`'s items.
#[derive(Default)]
pub(crate) struct ChildrenData {
    pub children: coppice_types::OrderedMap<String, ObjectRef>,
    /// `None` for an unorderable container (spec.md §4.3's `orderable`
    /// type option controls whether this is populated).
    pub order: Option<Vec<String>>,
}

/// A `Document`/`Workspace`'s children live behind a single synthetic
/// `ecm:children` container node, materialized lazily.
#[derive(Clone)]
pub(crate) enum DocChildren {
    NoChildren,
    Materialized(ObjectRef),
}

/// The capability-specific payload a loaded node carries, alongside its
/// common property map. `None` for plain `ObjectProperty` nodes that have
/// no children at all.
pub(crate) enum NodeExtra {
    None,
    Children(ChildrenData),
    DocChildren(DocChildren),
}

pub(crate) struct ActiveData {
    pub primary_type: QName,
    pub properties: coppice_types::OrderedMap<QName, PropertyValue>,
    pub extra: NodeExtra,
}

/// Common header every node carries regardless of capability, per the
/// "polymorphism over capability set" design: id, name, parent, dirty
/// tracking, and the ghost/active state itself.
pub(crate) struct NodeHeader {
    pub id: RefCell<Id>,
    pub name: RefCell<String>,
    pub parent: RefCell<Option<ObjectRef>>,
    pub dirty: RefCell<bool>,
    pub data: RefCell<DataState>,
    pub session: Weak<dyn SessionApi>,
}
