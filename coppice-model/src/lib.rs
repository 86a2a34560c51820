mod constants;
mod header;
mod node;
pub mod security;

pub use constants::{CHILDREN_NAME, IS_CHECKED_OUT, LOCAL_ROLES_PROPERTY, PRIMARY_TYPE, SECURITY_PROPERTY};
pub use header::{LoadedChildren, ObjectRef, PropertyValue, SessionApi};
pub use node::{NodeKind, NodeObject};

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::PropertyValue;
    use coppice_base::Result;
    use coppice_types::{Id, QName, Value};
    use std::cell::RefCell;
    use std::rc::{Rc, Weak};

    /// A minimal in-crate double standing in for the real session, enough
    /// to exercise the object model's delegation without depending on
    /// `coppice-session` (which itself depends on this crate). Holds its
    /// own `Weak<dyn SessionApi>` the way `coppice-session`'s `Inner` does,
    /// so construction methods can hand out back-references to freshly
    /// created nodes.
    struct FakeSession {
        self_weak: RefCell<Weak<dyn SessionApi>>,
        next_id: RefCell<u64>,
        direct_mutations: RefCell<u32>,
    }

    impl FakeSession {
        fn new() -> Rc<FakeSession> {
            let session = Rc::new(FakeSession {
                self_weak: RefCell::new(Weak::new()),
                next_id: RefCell::new(0),
                direct_mutations: RefCell::new(0),
            });
            let dyn_session: Rc<dyn SessionApi> = session.clone();
            *session.self_weak.borrow_mut() = Rc::downgrade(&dyn_session);
            session
        }

        fn weak(&self) -> Weak<dyn SessionApi> {
            self.self_weak.borrow().clone()
        }
    }

    impl SessionApi for FakeSession {
        fn ensure_loaded(&self, _object: &ObjectRef) -> Result<()> {
            Ok(())
        }
        fn set_property(&self, object: &ObjectRef, name: &QName, value: Option<Value>) -> Result<()> {
            object.set_property_entry(name.clone(), value.map(PropertyValue::Scalar))
        }
        fn new_value(&self, _list_property: &ObjectRef, name: Option<&str>) -> Result<ObjectRef> {
            let mut n = self.next_id.borrow_mut();
            *n += 1;
            let name = name.map(str::to_owned).unwrap_or_else(|| format!("item{n}"));
            Ok(NodeObject::new_active(
                Id::temp(*n),
                name,
                None,
                NodeKind::ObjectProperty,
                QName::new("ecm:item"),
                true,
                self.weak(),
            ))
        }
        fn create_child(&self, _container: &ObjectRef, name: &str, type_name: &QName) -> Result<ObjectRef> {
            let mut n = self.next_id.borrow_mut();
            *n += 1;
            Ok(NodeObject::new_active(
                Id::temp(*n),
                name.to_owned(),
                None,
                NodeKind::Container,
                type_name.clone(),
                true,
                self.weak(),
            ))
        }
        fn delete_node(&self, _object: &ObjectRef) -> Result<()> {
            Ok(())
        }
        fn reorder_children(&self, _object: &ObjectRef, _old_order: Vec<String>, _new_order: Vec<String>) -> Result<()> {
            Ok(())
        }
        fn checkin(&self, _object: &ObjectRef) -> Result<()> {
            Ok(())
        }
        fn checkout(&self, _object: &ObjectRef) -> Result<()> {
            Ok(())
        }
        fn register_direct(&self, object: &ObjectRef) {
            *self.direct_mutations.borrow_mut() += 1;
            object.mark_dirty();
        }
    }

    fn new_session() -> (Rc<FakeSession>, Weak<dyn SessionApi>) {
        let session = FakeSession::new();
        let weak = session.weak();
        (session, weak)
    }

    #[test]
    fn test_scalar_property_roundtrip() {
        let (_session, weak) = new_session();
        let obj = NodeObject::new_active(Id::temp(1), "root".into(), None, NodeKind::Document, QName::new("ecmnt:note"), true, weak);
        obj.set_property("title", Some(Value::from("hello"))).unwrap();
        assert_eq!(obj.get_property("title").unwrap(), Some(Value::from("hello")));
        obj.set_property("title", None).unwrap();
        assert_eq!(obj.get_property("title").unwrap(), None);
    }

    #[test]
    fn test_document_materializes_children_on_first_add() {
        let (_session, weak) = new_session();
        let doc = NodeObject::new_active(Id::temp(1), "root".into(), None, NodeKind::Document, QName::new("ecmnt:note"), true, weak);
        let child = doc.add_child("a", &QName::new("ecmnt:note")).unwrap();
        assert_eq!(child.name(), "a");
        assert_eq!(doc.children().unwrap().len(), 1);
    }

    #[test]
    fn test_add_child_rejects_duplicate() {
        let (_session, weak) = new_session();
        let container = NodeObject::new_active(Id::temp(1), "c".into(), None, NodeKind::Container, QName::new("ecmnt:children"), true, weak);
        container.add_child("a", &QName::new("ecmnt:note")).unwrap();
        assert!(container.add_child("a", &QName::new("ecmnt:note")).is_err());
    }

    #[test]
    fn test_reorder_rejects_mismatched_set() {
        let (_session, weak) = new_session();
        let container = NodeObject::new_active(Id::temp(1), "c".into(), None, NodeKind::Container, QName::new("ecmnt:children"), true, weak);
        container.add_child("a", &QName::new("ecmnt:note")).unwrap();
        container.add_child("b", &QName::new("ecmnt:note")).unwrap();
        assert!(container.reorder(vec!["a".into(), "x".into()]).is_err());
        container.reorder(vec!["b".into(), "a".into()]).unwrap();
    }

    #[test]
    fn test_ghost_round_trip() {
        let (_session, weak) = new_session();
        let obj = NodeObject::new_active(Id::temp(1), "root".into(), None, NodeKind::Document, QName::new("ecmnt:note"), true, weak);
        assert!(!obj.is_ghost());
        obj.ghostify();
        assert!(obj.is_ghost());
    }

    #[test]
    fn test_debug_direct_mutate_marks_dirty() {
        let (_session, weak) = new_session();
        let obj = NodeObject::new_active(Id::temp(1), "root".into(), None, NodeKind::Document, QName::new("ecmnt:note"), true, weak);
        assert!(!obj.is_dirty());
        obj.debug_direct_mutate().unwrap();
        assert!(obj.is_dirty());
    }
}
