//! Reusable scratch containers for one compile request
//!
//! Node compilers borrow cleared lists from the request's pool instead of
//! allocating per invocation; a guard returns the container (cleared, with
//! its capacity intact) on every exit path, including early `?` returns. The
//! pool is owned by a single compile request and never crosses threads.

use std::cell::RefCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::schema::{SchemaNode, TypeId};

/// Typed free-list of scratch containers, keyed by container kind.
#[derive(Debug, Default)]
pub(crate) struct ScratchPool {
    node_lists: RefCell<Vec<Vec<SchemaNode>>>,
    type_lists: RefCell<Vec<Vec<TypeId>>>,
}

impl ScratchPool {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

/// Borrow a cleared schema-node list from the pool.
pub(crate) fn node_list(pool: &Rc<ScratchPool>) -> NodeList {
    let buf = pool.node_lists.borrow_mut().pop().unwrap_or_default();
    NodeList {
        pool: Rc::clone(pool),
        buf,
    }
}

/// Borrow a cleared type-id list from the pool.
pub(crate) fn type_list(pool: &Rc<ScratchPool>) -> TypeList {
    let buf = pool.type_lists.borrow_mut().pop().unwrap_or_default();
    TypeList {
        pool: Rc::clone(pool),
        buf,
    }
}

/// Guard over a borrowed node list; drop returns it to the pool.
#[derive(Debug)]
pub(crate) struct NodeList {
    pool: Rc<ScratchPool>,
    buf: Vec<SchemaNode>,
}

impl Deref for NodeList {
    type Target = Vec<SchemaNode>;
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for NodeList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for NodeList {
    fn drop(&mut self) {
        self.buf.clear();
        self.pool.node_lists.borrow_mut().push(mem::take(&mut self.buf));
    }
}

/// Guard over a borrowed type-id list; drop returns it to the pool.
#[derive(Debug)]
pub(crate) struct TypeList {
    pool: Rc<ScratchPool>,
    buf: Vec<TypeId>,
}

impl Deref for TypeList {
    type Target = Vec<TypeId>;
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for TypeList {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for TypeList {
    fn drop(&mut self) {
        self.buf.clear();
        self.pool.type_lists.borrow_mut().push(mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_returned_cleared() {
        let pool = ScratchPool::new();
        {
            let mut list = node_list(&pool);
            list.push(SchemaNode::leaf(TypeId::Int));
            assert_eq!(list.len(), 1);
        }
        let list = node_list(&pool);
        assert!(list.is_empty());
    }

    #[test]
    fn test_capacity_survives_reuse() {
        let pool = ScratchPool::new();
        {
            let mut list = type_list(&pool);
            for _ in 0..64 {
                list.push(TypeId::Int);
            }
        }
        let list = type_list(&pool);
        assert!(list.capacity() >= 64);
    }

    #[test]
    fn test_concurrent_borrows_from_one_pool() {
        let pool = ScratchPool::new();
        let mut a = node_list(&pool);
        let mut b = node_list(&pool);
        a.push(SchemaNode::leaf(TypeId::Str));
        b.push(SchemaNode::leaf(TypeId::Bool));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
