//! Binary encoding of task trees and expressions.
//!
//! Parent links are written for every node and checked against the tree
//! shape on decode, so a decoded tree has the same back references as the
//! encoded one.

use protocol::codec::{read_len, read_tag};
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

use super::expr::{ExprCode, ExprValue, Expression, UnitVar};
use super::info::{Cmd, CmdCode, TaskId, TaskInfo, TaskState, TaskType};
use crate::coords::Coordinate;

/// Deepest tree accepted from the wire.
pub const MAX_TREE_DEPTH: usize = 64;

impl Encode for TaskId {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u64(self.0);
    }
}

impl Decode for TaskId {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(TaskId(u64::decode(r)?))
    }
}

impl Encode for TaskState {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(*self as u8);
    }
}

impl Decode for TaskState {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        match read_tag(r)? {
            0 => Ok(TaskState::Idle),
            1 => Ok(TaskState::Active),
            2 => Ok(TaskState::Completed),
            3 => Ok(TaskState::Failed),
            tag => Err(ProtocolError::InvalidTag { what: "task state", tag }),
        }
    }
}

impl Encode for Cmd {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(self.code as u8);
        w.put_i32(self.unit);
        self.target.encode(w);
        w.put_i32(self.param);
    }
}

impl Decode for Cmd {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let code = match read_tag(r)? {
            0 => CmdCode::Wait,
            1 => CmdCode::Move,
            2 => CmdCode::Grow,
            3 => CmdCode::Diminish,
            4 => CmdCode::Split,
            5 => CmdCode::Convert,
            6 => CmdCode::Explode,
            7 => CmdCode::Cancel,
            tag => return Err(ProtocolError::InvalidTag { what: "command", tag }),
        };
        Ok(Cmd {
            code,
            unit: i32::decode(r)?,
            target: Option::<Coordinate>::decode(r)?,
            param: i32::decode(r)?,
        })
    }
}

impl Encode for ExprValue {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            ExprValue::Bool(b) => {
                w.put_u8(0);
                b.encode(w);
            }
            ExprValue::Int(i) => {
                w.put_u8(1);
                w.put_i64(*i);
            }
            ExprValue::Coord(c) => {
                w.put_u8(2);
                c.encode(w);
            }
            ExprValue::Var(v) => {
                w.put_u8(3);
                w.put_u8(*v as u8);
            }
        }
    }
}

impl Decode for ExprValue {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        match read_tag(r)? {
            0 => Ok(ExprValue::Bool(bool::decode(r)?)),
            1 => Ok(ExprValue::Int(i64::decode(r)?)),
            2 => Ok(ExprValue::Coord(Coordinate::decode(r)?)),
            3 => {
                let tag = read_tag(r)?;
                UnitVar::from_u8(tag)
                    .map(ExprValue::Var)
                    .ok_or(ProtocolError::InvalidTag { what: "unit var", tag })
            }
            tag => Err(ProtocolError::InvalidTag { what: "expression value", tag }),
        }
    }
}

impl Encode for Expression {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(self.code as u8);
        self.value.encode(w);
        self.children.encode(w);
    }
}

impl Decode for Expression {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        decode_expression(r, 1)
    }
}

fn decode_expression(r: &mut BinaryReader, depth: usize) -> Result<Expression, ProtocolError> {
    if depth > MAX_TREE_DEPTH {
        return Err(ProtocolError::InvalidValue("expression too deep".into()));
    }
    let tag = read_tag(r)?;
    let code = ExprCode::from_u8(tag).ok_or(ProtocolError::InvalidTag { what: "expression", tag })?;
    let value = Option::<ExprValue>::decode(r)?;
    let len = read_len(r)?;
    let mut children = Vec::with_capacity(len.min(16));
    for _ in 0..len {
        children.push(decode_expression(r, depth + 1)?);
    }
    Ok(Expression { code, value, children })
}

impl Encode for TaskInfo {
    fn encode(&self, w: &mut BinaryWriter) {
        self.id.encode(w);
        w.put_u8(self.task_type as u8);
        self.cmd.encode(w);
        self.expression.encode(w);
        self.state.encode(w);
        self.parent.encode(w);
        self.children.encode(w);
    }
}

impl Decode for TaskInfo {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        decode_task(r, 1)
    }
}

fn decode_task(r: &mut BinaryReader, depth: usize) -> Result<TaskInfo, ProtocolError> {
    if depth > MAX_TREE_DEPTH {
        return Err(ProtocolError::InvalidValue("task tree too deep".into()));
    }
    let id = TaskId::decode(r)?;
    let task_type = match read_tag(r)? {
        0 => TaskType::Command,
        1 => TaskType::Sequence,
        2 => TaskType::Branch,
        tag => return Err(ProtocolError::InvalidTag { what: "task type", tag }),
    };
    let cmd = Option::<Cmd>::decode(r)?;
    let expression = Option::<Expression>::decode(r)?;
    let state = TaskState::decode(r)?;
    let parent = Option::<TaskId>::decode(r)?;
    let len = read_len(r)?;
    let mut children = Vec::with_capacity(len.min(16));
    for _ in 0..len {
        let child = decode_task(r, depth + 1)?;
        if child.parent != Some(id) && child.parent.is_some() {
            return Err(ProtocolError::InvalidValue(format!(
                "task {} claims parent {:?}, enclosed by {}",
                child.id, child.parent, id
            )));
        }
        children.push(child);
    }
    Ok(TaskInfo {
        id,
        task_type,
        cmd,
        expression,
        state,
        children,
        parent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Dir;
    use crate::task::TaskIdAlloc;
    use protocol::{from_bytes, to_bytes};

    fn tree() -> TaskInfo {
        let guard = Expression::and(vec![
            Expression::unit_exists(1),
            Expression::negate(Expression::enemy_visible()),
            Expression::lt(Expression::var(UnitVar::Height), Expression::int(4)),
        ]);
        let mut t = TaskInfo::branch(
            guard,
            TaskInfo::command(Cmd::move_to(1, Coordinate::new(2, 2, 6, 2))),
            Some(TaskInfo::command(Cmd::split(1, Dir::South))),
        );
        t.assign_ids(&mut TaskIdAlloc::new());
        t
    }

    #[test]
    fn test_task_roundtrip_keeps_parents() {
        let original = tree();
        let back: TaskInfo = from_bytes(to_bytes(&original)).unwrap();
        assert_eq!(back, original);
        for child in &back.children {
            assert_eq!(child.parent, Some(back.id));
        }
    }

    #[test]
    fn test_unassigned_trees_roundtrip() {
        let seq = TaskInfo::sequence(vec![
            TaskInfo::command(Cmd::wait(0, 1)),
            TaskInfo::command(Cmd::wait(0, 2)),
        ]);
        let back: TaskInfo = from_bytes(to_bytes(&seq)).unwrap();
        assert_eq!(back, seq);
        assert!(back.children.iter().all(|c| c.parent.is_none()));

        let branch = TaskInfo::branch(
            Expression::food_visible(),
            TaskInfo::command(Cmd::wait(3, 1)),
            Some(TaskInfo::sequence(vec![TaskInfo::command(Cmd::wait(3, 4))])),
        );
        let back: TaskInfo = from_bytes(to_bytes(&branch)).unwrap();
        assert_eq!(back, branch);
    }

    #[test]
    fn test_expression_roundtrip() {
        let e = Expression::plus(
            Expression::self_coord(),
            Expression::coord(Coordinate::new(1, 1, 0, 2)),
        );
        let back: Expression = from_bytes(to_bytes(&e)).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_deep_expression_rejected() {
        let mut e = Expression::bool(true);
        for _ in 0..MAX_TREE_DEPTH {
            e = Expression::negate(e);
        }
        assert!(from_bytes::<Expression>(to_bytes(&e)).is_err());
    }

    #[test]
    fn test_foreign_parent_rejected() {
        let mut t = tree();
        t.children[0].parent = Some(TaskId(999));
        assert!(from_bytes::<TaskInfo>(to_bytes(&t)).is_err());
    }
}
