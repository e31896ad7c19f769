// This module provides the editable method body used by the weaver. Instructions live
// in an arena and are addressed by InstId handles that stay valid for the life of the
// body; program order is a doubly linked list threaded through the arena. Inserting
// before or after a node, appending, and replacing a node's opcode never move or
// invalidate other nodes, so branch operands and exception-region boundaries (which
// are InstIds) keep referring to the instruction they referred to before the edit.
// Region end boundaries are exclusive; an end of None means "end of body".

//! Identity-stable method body.

use std::fmt;

use hashbrown::HashMap;

use super::opcode::Opcode;
use super::TypeRef;
use crate::core::error::{WeaveError, WeaveResult};

/// Stable handle of an instruction node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u16);

impl LocalId {
    pub const fn from_index(index: u16) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: Option<String>,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Catch,
    Finally,
}

/// Protected region with its handler. Ends are exclusive; `None` runs to the
/// end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    pub kind: RegionKind,
    pub try_start: InstId,
    pub try_end: Option<InstId>,
    pub handler_start: InstId,
    pub handler_end: Option<InstId>,
}

impl ExceptionRegion {
    fn boundaries(&self) -> impl Iterator<Item = InstId> {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    op: Opcode,
    prev: Option<InstId>,
    next: Option<InstId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    nodes: Vec<Node>,
    head: Option<InstId>,
    tail: Option<InstId>,
    locals: Vec<Local>,
    regions: Vec<ExceptionRegion>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ops(ops: impl IntoIterator<Item = Opcode>) -> Self {
        let mut body = Self::new();
        for op in ops {
            body.push(op);
        }
        body
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<InstId> {
        self.head
    }

    pub fn last(&self) -> Option<InstId> {
        self.tail
    }

    pub fn contains(&self, id: InstId) -> bool {
        id.index() < self.nodes.len()
    }

    fn node(&self, id: InstId) -> WeaveResult<&Node> {
        self.nodes
            .get(id.index())
            .ok_or(WeaveError::DanglingInstruction(id))
    }

    fn node_mut(&mut self, id: InstId) -> WeaveResult<&mut Node> {
        self.nodes
            .get_mut(id.index())
            .ok_or(WeaveError::DanglingInstruction(id))
    }

    pub fn op(&self, id: InstId) -> Option<&Opcode> {
        self.nodes.get(id.index()).map(|n| &n.op)
    }

    pub fn next(&self, id: InstId) -> Option<InstId> {
        self.nodes.get(id.index()).and_then(|n| n.next)
    }

    pub fn prev(&self, id: InstId) -> Option<InstId> {
        self.nodes.get(id.index()).and_then(|n| n.prev)
    }

    /// Instructions in program order.
    pub fn iter(&self) -> BodyIter<'_> {
        BodyIter {
            body: self,
            cursor: self.head,
        }
    }

    pub fn ids(&self) -> Vec<InstId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn ops(&self) -> Vec<Opcode> {
        self.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Program-order position of every instruction.
    pub fn positions(&self) -> HashMap<InstId, usize> {
        self.iter().enumerate().map(|(pos, (id, _))| (id, pos)).collect()
    }

    fn alloc(&mut self, op: Opcode) -> InstId {
        let id = InstId(self.nodes.len() as u32);
        self.nodes.push(Node {
            op,
            prev: None,
            next: None,
        });
        id
    }

    /// Append at the end of the body.
    pub fn push(&mut self, op: Opcode) -> InstId {
        let id = self.alloc(op);
        match self.tail {
            Some(tail) => {
                self.nodes[tail.index()].next = Some(id);
                self.nodes[id.index()].prev = Some(tail);
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Insert `op` immediately before `anchor`. References to `anchor` are
    /// left alone, so branches into `anchor` skip the new instruction.
    pub fn insert_before(&mut self, anchor: InstId, op: Opcode) -> WeaveResult<InstId> {
        let prev = self.node(anchor)?.prev;
        let id = self.alloc(op);
        {
            let node = &mut self.nodes[id.index()];
            node.prev = prev;
            node.next = Some(anchor);
        }
        self.nodes[anchor.index()].prev = Some(id);
        match prev {
            Some(p) => self.nodes[p.index()].next = Some(id),
            None => self.head = Some(id),
        }
        Ok(id)
    }

    /// Insert a sequence before `anchor`, keeping its order.
    pub fn insert_all_before(
        &mut self,
        anchor: InstId,
        ops: impl IntoIterator<Item = Opcode>,
    ) -> WeaveResult<Vec<InstId>> {
        ops.into_iter()
            .map(|op| self.insert_before(anchor, op))
            .collect()
    }

    pub fn insert_after(&mut self, anchor: InstId, op: Opcode) -> WeaveResult<InstId> {
        let next = self.node(anchor)?.next;
        let id = self.alloc(op);
        {
            let node = &mut self.nodes[id.index()];
            node.prev = Some(anchor);
            node.next = next;
        }
        self.nodes[anchor.index()].next = Some(id);
        match next {
            Some(n) => self.nodes[n.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        Ok(id)
    }

    /// Swap the opcode of `id`, keeping its identity and position. Returns
    /// the previous opcode.
    pub fn replace(&mut self, id: InstId, op: Opcode) -> WeaveResult<Opcode> {
        let node = self.node_mut(id)?;
        Ok(std::mem::replace(&mut node.op, op))
    }

    pub fn locals(&self) -> &[Local] {
        &self.locals
    }

    pub fn local(&self, id: LocalId) -> Option<&Local> {
        self.locals.get(id.index())
    }

    /// Declare a local. Fails once the `u16` local index space is used up.
    pub fn add_local(&mut self, ty: TypeRef, name: Option<String>) -> WeaveResult<LocalId> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| WeaveError::malformed(format!("more than {} locals", u16::MAX)))?;
        self.locals.push(Local { name, ty });
        Ok(LocalId(index))
    }

    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut [ExceptionRegion] {
        &mut self.regions
    }

    pub fn add_region(&mut self, region: ExceptionRegion) -> WeaveResult<()> {
        for boundary in region.boundaries() {
            self.node(boundary)?;
        }
        self.regions.push(region);
        Ok(())
    }

    /// Check that the body can be woven: non-empty, every branch target and
    /// region boundary is a live instruction, every local is declared, and
    /// region ranges are ordered.
    pub fn validate(&self) -> WeaveResult<()> {
        if self.is_empty() {
            return Err(WeaveError::EmptyBody);
        }
        let positions = self.positions();
        if positions.len() != self.nodes.len() {
            return Err(WeaveError::malformed(format!(
                "{} instructions are not linked into the body",
                self.nodes.len() - positions.len()
            )));
        }
        for (id, op) in self.iter() {
            if let Some(target) = op.branch_target() {
                if !positions.contains_key(&target) {
                    return Err(WeaveError::malformed(format!(
                        "{} at {} jumps to missing instruction {}",
                        op.mnemonic(),
                        id,
                        target
                    )));
                }
            }
            if let Some(local) = op.local() {
                if local.index() >= self.locals.len() {
                    return Err(WeaveError::malformed(format!(
                        "{} at {} uses undeclared local {}",
                        op.mnemonic(),
                        id,
                        local.index()
                    )));
                }
            }
        }
        let end = self.nodes.len();
        for region in &self.regions {
            let pos = |b: Option<InstId>| -> WeaveResult<usize> {
                match b {
                    Some(id) => positions
                        .get(&id)
                        .copied()
                        .ok_or(WeaveError::DanglingInstruction(id)),
                    None => Ok(end),
                }
            };
            let try_start = pos(Some(region.try_start))?;
            let try_end = pos(region.try_end)?;
            let handler_start = pos(Some(region.handler_start))?;
            let handler_end = pos(region.handler_end)?;
            if try_start >= try_end || handler_start >= handler_end {
                return Err(WeaveError::malformed(format!(
                    "exception region {}..{} / {}..{} is empty or reversed",
                    try_start, try_end, handler_start, handler_end
                )));
            }
        }
        Ok(())
    }
}

pub struct BodyIter<'a> {
    body: &'a Body,
    cursor: Option<InstId>,
}

impl<'a> Iterator for BodyIter<'a> {
    type Item = (InstId, &'a Opcode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.body.nodes.get(id.index())?;
        self.cursor = node.next;
        Some((id, &node.op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Literal;

    fn int(v: i32) -> Opcode {
        Opcode::Const(Literal::Int(v))
    }

    #[test]
    fn test_insert_before_keeps_branch_targets() {
        let mut body = Body::new();
        let head = body.push(int(1));
        let ret = body.push(Opcode::Ret);
        let br = body.insert_before(ret, Opcode::Br(head)).unwrap();

        let prologue = body.insert_before(head, Opcode::Nop).unwrap();
        assert_eq!(body.first(), Some(prologue));
        assert_eq!(body.op(br), Some(&Opcode::Br(head)));
        assert_eq!(
            body.ops(),
            vec![Opcode::Nop, int(1), Opcode::Br(head), Opcode::Ret]
        );
        assert_eq!(body.prev(head), Some(prologue));
    }

    #[test]
    fn test_insert_after_tail_moves_tail() {
        let mut body = Body::from_ops([int(1)]);
        let first = body.first().unwrap();
        let ret = body.insert_after(first, Opcode::Ret).unwrap();
        assert_eq!(body.last(), Some(ret));
        assert_eq!(body.next(first), Some(ret));
        assert_eq!(body.positions()[&ret], 1);
    }

    #[test]
    fn test_replace_keeps_identity() {
        let mut body = Body::new();
        let ret = body.push(Opcode::Ret);
        let before = body.insert_before(ret, Opcode::BrTrue(ret)).unwrap();
        let old = body.replace(ret, Opcode::Pop).unwrap();
        assert_eq!(old, Opcode::Ret);
        assert_eq!(body.op(before), Some(&Opcode::BrTrue(ret)));
        assert_eq!(body.op(ret), Some(&Opcode::Pop));
    }

    #[test]
    fn test_insert_all_before_preserves_order() {
        let mut body = Body::from_ops([Opcode::Ret]);
        let ret = body.first().unwrap();
        body.insert_all_before(ret, [int(1), int(2), Opcode::Add])
            .unwrap();
        assert_eq!(body.ops(), vec![int(1), int(2), Opcode::Add, Opcode::Ret]);
    }

    #[test]
    fn test_validate_rejects_dangling_branch() {
        let mut body = Body::new();
        body.push(Opcode::Br(InstId::from_index(42)));
        let err = body.validate().unwrap_err();
        assert!(matches!(err, WeaveError::MalformedBody { .. }));

        assert_eq!(Body::new().validate(), Err(WeaveError::EmptyBody));
    }

    #[test]
    fn test_validate_rejects_undeclared_local() {
        let body = Body::from_ops([Opcode::LdLoc(LocalId::from_index(0)), Opcode::Ret]);
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_add_region_checks_boundaries() {
        let mut body = Body::from_ops([Opcode::Nop, Opcode::EndFinally, Opcode::Ret]);
        let ids = body.ids();
        let region = ExceptionRegion {
            kind: RegionKind::Finally,
            try_start: ids[0],
            try_end: Some(ids[1]),
            handler_start: ids[1],
            handler_end: Some(ids[2]),
        };
        body.add_region(region.clone()).unwrap();
        assert!(body.validate().is_ok());

        let bad = ExceptionRegion {
            handler_end: Some(InstId::from_index(99)),
            ..region
        };
        assert_eq!(
            body.add_region(bad),
            Err(WeaveError::DanglingInstruction(InstId::from_index(99)))
        );
    }

    #[test]
    fn test_local_index_space_is_bounded() {
        let mut body = Body::new();
        let int = TypeRef::named("int");
        for _ in 0..=u16::MAX as usize {
            body.add_local(int.clone(), None).unwrap();
        }
        assert_eq!(body.locals().len(), u16::MAX as usize + 1);
        let err = body.add_local(int, None).unwrap_err();
        assert!(matches!(err, WeaveError::MalformedBody { .. }));
        assert_eq!(body.locals().len(), u16::MAX as usize + 1);
    }
}
