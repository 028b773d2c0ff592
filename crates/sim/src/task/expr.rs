//! Guard expressions.
//!
//! Expressions are evaluated against the current map every tick. Evaluation
//! never mutates anything and nothing is cached between ticks.

use thiserror::Error;

use crate::coords::{Coordinate, MapPos};
use crate::map::{MapCamera, MapRoot, VoxelType};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprCode {
    /// Literal `value`.
    Value = 0,
    /// Attribute `value` of a unit (child 0: unit index, default the task's unit).
    Var = 1,
    /// Coordinate of a unit (child 0: unit index, default the task's unit).
    Coord = 2,
    And = 3,
    Or = 4,
    Not = 5,
    Eq = 6,
    Lt = 7,
    Gt = 8,
    Add = 9,
    Sub = 10,
    /// Whether a unit is alive (child 0: unit index, default the task's unit).
    UnitExists = 11,
    /// Food inside the task unit's sight window.
    FoodVisible = 12,
    /// Another player's unit inside the task unit's sight window.
    EnemyVisible = 13,
}

impl ExprCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        use ExprCode::*;
        const ALL: [ExprCode; 14] = [
            Value,
            Var,
            Coord,
            And,
            Or,
            Not,
            Eq,
            Lt,
            Gt,
            Add,
            Sub,
            UnitExists,
            FoodVisible,
            EnemyVisible,
        ];
        ALL.get(v as usize).copied()
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitVar {
    Health = 0,
    Height = 1,
    Row = 2,
    Col = 3,
    Altitude = 4,
    Owner = 5,
    Type = 6,
}

impl UnitVar {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(UnitVar::Health),
            1 => Some(UnitVar::Height),
            2 => Some(UnitVar::Row),
            3 => Some(UnitVar::Col),
            4 => Some(UnitVar::Altitude),
            5 => Some(UnitVar::Owner),
            6 => Some(UnitVar::Type),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprValue {
    Bool(bool),
    Int(i64),
    Coord(Coordinate),
    Var(UnitVar),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("{code:?} expects {expected} operand(s), got {got}")]
    Arity { code: ExprCode, expected: usize, got: usize },

    #[error("{0:?} is missing its value")]
    MissingValue(ExprCode),

    #[error("type mismatch in {0:?}")]
    TypeMismatch(ExprCode),

    #[error("unit {0} does not exist")]
    NoUnit(i32),

    #[error("arithmetic overflow in {0:?}")]
    Overflow(ExprCode),
}

/// What an expression can see.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub map: &'a MapRoot,
    /// Unit the evaluated task drives.
    pub unit: i32,
    pub sight_radius: i32,
}

/// A node of an expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression {
    pub code: ExprCode,
    pub value: Option<ExprValue>,
    pub children: Vec<Expression>,
}

impl Expression {
    pub fn new(code: ExprCode, children: Vec<Expression>) -> Self {
        Self {
            code,
            value: None,
            children,
        }
    }

    pub fn value(value: ExprValue) -> Self {
        Self {
            code: ExprCode::Value,
            value: Some(value),
            children: Vec::new(),
        }
    }

    pub fn bool(v: bool) -> Self {
        Self::value(ExprValue::Bool(v))
    }

    pub fn int(v: i64) -> Self {
        Self::value(ExprValue::Int(v))
    }

    pub fn coord(c: Coordinate) -> Self {
        Self::value(ExprValue::Coord(c))
    }

    /// Attribute of the task's unit.
    pub fn var(var: UnitVar) -> Self {
        Self {
            code: ExprCode::Var,
            value: Some(ExprValue::Var(var)),
            children: Vec::new(),
        }
    }

    /// Coordinate of the task's unit.
    pub fn self_coord() -> Self {
        Self::new(ExprCode::Coord, Vec::new())
    }

    pub fn unit_exists(unit: i32) -> Self {
        Self::new(ExprCode::UnitExists, vec![Self::int(unit as i64)])
    }

    pub fn and(children: Vec<Expression>) -> Self {
        Self::new(ExprCode::And, children)
    }

    pub fn or(children: Vec<Expression>) -> Self {
        Self::new(ExprCode::Or, children)
    }

    pub fn negate(inner: Expression) -> Self {
        Self::new(ExprCode::Not, vec![inner])
    }

    pub fn equals(a: Expression, b: Expression) -> Self {
        Self::new(ExprCode::Eq, vec![a, b])
    }

    pub fn lt(a: Expression, b: Expression) -> Self {
        Self::new(ExprCode::Lt, vec![a, b])
    }

    pub fn gt(a: Expression, b: Expression) -> Self {
        Self::new(ExprCode::Gt, vec![a, b])
    }

    pub fn plus(a: Expression, b: Expression) -> Self {
        Self::new(ExprCode::Add, vec![a, b])
    }

    pub fn minus(a: Expression, b: Expression) -> Self {
        Self::new(ExprCode::Sub, vec![a, b])
    }

    pub fn food_visible() -> Self {
        Self::new(ExprCode::FoodVisible, Vec::new())
    }

    pub fn enemy_visible() -> Self {
        Self::new(ExprCode::EnemyVisible, Vec::new())
    }

    /// Depth of the tree (a leaf is 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(Expression::depth).max().unwrap_or(0)
    }

    fn arity(&self, expected: usize) -> Result<(), ExprError> {
        if self.children.len() != expected {
            return Err(ExprError::Arity {
                code: self.code,
                expected,
                got: self.children.len(),
            });
        }
        Ok(())
    }

    /// Unit named by an optional first child, else the context unit.
    fn subject(&self, ctx: &EvalContext<'_>) -> Result<i32, ExprError> {
        match self.children.first() {
            None => Ok(ctx.unit),
            Some(child) => match child.eval(ctx)? {
                ExprValue::Int(i) => i32::try_from(i).map_err(|_| ExprError::NoUnit(-1)),
                _ => Err(ExprError::TypeMismatch(self.code)),
            },
        }
    }

    fn eval_bool(&self, ctx: &EvalContext<'_>) -> Result<bool, ExprError> {
        match self.eval(ctx)? {
            ExprValue::Bool(b) => Ok(b),
            _ => Err(ExprError::TypeMismatch(self.code)),
        }
    }

    fn eval_pair(&self, ctx: &EvalContext<'_>) -> Result<(ExprValue, ExprValue), ExprError> {
        self.arity(2)?;
        Ok((self.children[0].eval(ctx)?, self.children[1].eval(ctx)?))
    }

    pub fn eval(&self, ctx: &EvalContext<'_>) -> Result<ExprValue, ExprError> {
        match self.code {
            ExprCode::Value => match self.value {
                Some(ExprValue::Var(_)) => Err(ExprError::TypeMismatch(self.code)),
                Some(v) => Ok(v),
                None => Err(ExprError::MissingValue(self.code)),
            },
            ExprCode::Var => {
                let Some(ExprValue::Var(var)) = self.value else {
                    return Err(ExprError::MissingValue(self.code));
                };
                let unit = self.subject(ctx)?;
                let id = ctx.map.unit(unit).ok_or(ExprError::NoUnit(unit))?;
                let v = ctx.map.voxel(id).ok_or(ExprError::NoUnit(unit))?;
                let coord = ctx.map.voxel_coordinate(id).ok_or(ExprError::NoUnit(unit))?;
                Ok(ExprValue::Int(match var {
                    UnitVar::Health => v.health as i64,
                    UnitVar::Height => v.height as i64,
                    UnitVar::Row => coord.row() as i64,
                    UnitVar::Col => coord.col() as i64,
                    UnitVar::Altitude => v.altitude as i64,
                    UnitVar::Owner => v.owner as i64,
                    UnitVar::Type => v.voxel_type as i64,
                }))
            }
            ExprCode::Coord => {
                let unit = self.subject(ctx)?;
                ctx.map
                    .unit_coordinate(unit)
                    .map(ExprValue::Coord)
                    .ok_or(ExprError::NoUnit(unit))
            }
            ExprCode::And => {
                for child in &self.children {
                    if !child.eval_bool(ctx)? {
                        return Ok(ExprValue::Bool(false));
                    }
                }
                Ok(ExprValue::Bool(true))
            }
            ExprCode::Or => {
                for child in &self.children {
                    if child.eval_bool(ctx)? {
                        return Ok(ExprValue::Bool(true));
                    }
                }
                Ok(ExprValue::Bool(false))
            }
            ExprCode::Not => {
                self.arity(1)?;
                Ok(ExprValue::Bool(!self.children[0].eval_bool(ctx)?))
            }
            ExprCode::Eq => {
                let (a, b) = self.eval_pair(ctx)?;
                if std::mem::discriminant(&a) != std::mem::discriminant(&b) {
                    return Err(ExprError::TypeMismatch(self.code));
                }
                Ok(ExprValue::Bool(a == b))
            }
            ExprCode::Lt | ExprCode::Gt => match self.eval_pair(ctx)? {
                (ExprValue::Int(a), ExprValue::Int(b)) => {
                    Ok(ExprValue::Bool(if self.code == ExprCode::Lt { a < b } else { a > b }))
                }
                _ => Err(ExprError::TypeMismatch(self.code)),
            },
            ExprCode::Add | ExprCode::Sub => {
                let add = self.code == ExprCode::Add;
                let overflow = ExprError::Overflow(self.code);
                match self.eval_pair(ctx)? {
                    (ExprValue::Int(a), ExprValue::Int(b)) => {
                        let v = if add { a.checked_add(b) } else { a.checked_sub(b) };
                        v.map(ExprValue::Int).ok_or(overflow)
                    }
                    (ExprValue::Coord(a), ExprValue::Coord(b)) => {
                        let (row, col) = if add {
                            (a.row().checked_add(b.row()), a.col().checked_add(b.col()))
                        } else {
                            (a.row().checked_sub(b.row()), a.col().checked_sub(b.col()))
                        };
                        let (Some(row), Some(col)) = (row, col) else {
                            return Err(overflow);
                        };
                        Ok(ExprValue::Coord(Coordinate {
                            pos: MapPos::new(row, col),
                            ..a
                        }))
                    }
                    _ => Err(ExprError::TypeMismatch(self.code)),
                }
            }
            ExprCode::UnitExists => {
                let unit = self.subject(ctx)?;
                Ok(ExprValue::Bool(
                    ctx.map.unit_data(unit).is_some_and(|v| v.voxel_type.is_unit()),
                ))
            }
            ExprCode::FoodVisible | ExprCode::EnemyVisible => {
                let id = ctx.map.unit(ctx.unit).ok_or(ExprError::NoUnit(ctx.unit))?;
                let me = ctx.map.voxel(id).ok_or(ExprError::NoUnit(ctx.unit))?;
                let at = ctx.map.voxel_coordinate(id).ok_or(ExprError::NoUnit(ctx.unit))?;
                let camera = MapCamera::new(at.pos, at.weight, ctx.sight_radius);
                let owner = me.owner;
                let food = self.code == ExprCode::FoodVisible;
                let seen = ctx.map.units().any(|(_, vid)| {
                    let Some(v) = ctx.map.voxel(vid) else { return false };
                    let matches = if food {
                        v.voxel_type == VoxelType::Eatable
                    } else {
                        v.voxel_type.is_unit() && v.owner >= 0 && v.owner != owner
                    };
                    matches && ctx.map.voxel_coordinate(vid).is_some_and(|c| camera.contains(&c))
                });
                Ok(ExprValue::Bool(seen))
            }
        }
    }

    /// Guard semantics: anything but `Ok(Bool(true))` fails the guard.
    pub fn eval_guard(&self, ctx: &EvalContext<'_>) -> bool {
        matches!(self.eval(ctx), Ok(ExprValue::Bool(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(map: &MapRoot, unit: i32) -> EvalContext<'_> {
        EvalContext {
            map,
            unit,
            sight_radius: 1,
        }
    }

    #[test]
    fn test_short_circuit_skips_bad_operand() {
        let map = MapRoot::test_env0().unwrap();
        // the second operand is ill-typed; short-circuit never reaches it
        let and = Expression::and(vec![Expression::bool(false), Expression::int(3)]);
        assert_eq!(and.eval(&ctx(&map, 1)), Ok(ExprValue::Bool(false)));
        let or = Expression::or(vec![Expression::bool(true), Expression::int(3)]);
        assert_eq!(or.eval(&ctx(&map, 1)), Ok(ExprValue::Bool(true)));
        let bad = Expression::and(vec![Expression::bool(true), Expression::int(3)]);
        assert_eq!(bad.eval(&ctx(&map, 1)), Err(ExprError::TypeMismatch(ExprCode::Value)));
    }

    #[test]
    fn test_vars_and_coords() {
        let map = MapRoot::test_env0().unwrap();
        let c = ctx(&map, 1);
        assert_eq!(Expression::var(UnitVar::Row).eval(&c), Ok(ExprValue::Int(1)));
        assert_eq!(Expression::var(UnitVar::Health).eval(&c), Ok(ExprValue::Int(2)));
        let target = Expression::plus(Expression::self_coord(), Expression::coord(Coordinate::new(1, 1, 0, 2)));
        assert_eq!(target.eval(&c), Ok(ExprValue::Coord(Coordinate::new(2, 2, 6, 2))));
        assert!(Expression::gt(Expression::var(UnitVar::Altitude), Expression::int(5)).eval_guard(&c));
        assert!(!Expression::unit_exists(42).eval_guard(&c));
        assert!(Expression::unit_exists(0).eval_guard(&c));
        // food is an asset, not a unit
        assert!(!Expression::unit_exists(2).eval_guard(&c));
    }

    #[test]
    fn test_arithmetic_overflow_is_an_error() {
        let map = MapRoot::test_env0().unwrap();
        let c = ctx(&map, 1);
        let sub = Expression::minus(Expression::int(0), Expression::int(i64::MIN));
        assert_eq!(sub.eval(&c), Err(ExprError::Overflow(ExprCode::Sub)));
        let add = Expression::plus(Expression::int(i64::MAX), Expression::int(1));
        assert_eq!(add.eval(&c), Err(ExprError::Overflow(ExprCode::Add)));
        assert_eq!(
            Expression::minus(Expression::int(5), Expression::int(7)).eval(&c),
            Ok(ExprValue::Int(-2))
        );

        let far = Expression::coord(Coordinate::new(i32::MIN, 0, 0, 2));
        let coord_sub = Expression::minus(Expression::self_coord(), far);
        assert_eq!(coord_sub.eval(&c), Err(ExprError::Overflow(ExprCode::Sub)));
        let edge = Expression::coord(Coordinate::new(i32::MAX, 0, 0, 2));
        let coord_add = Expression::plus(edge, Expression::self_coord());
        assert_eq!(coord_add.eval(&c), Err(ExprError::Overflow(ExprCode::Add)));
        let back = Expression::minus(Expression::self_coord(), Expression::coord(Coordinate::new(1, 1, 0, 2)));
        assert_eq!(back.eval(&c), Ok(ExprValue::Coord(Coordinate::new(0, 0, 6, 2))));

        // an overflowing operand fails the guard instead of aborting the tick
        let huge = Expression::minus(Expression::int(0), Expression::int(i64::MIN));
        assert!(!Expression::lt(Expression::var(UnitVar::Row), huge).eval_guard(&c));
    }

    #[test]
    fn test_visibility() {
        let map = MapRoot::test_env0().unwrap();
        // player 1's eater at (1, 1) sees food at (0, 0) with radius 1
        assert!(Expression::food_visible().eval_guard(&ctx(&map, 1)));
        // player 0's eater at (2, 3) sees (3, 3) diagonally
        assert!(Expression::food_visible().eval_guard(&ctx(&map, 0)));
        // (1, 1) and (2, 3) are two columns apart
        assert!(!Expression::enemy_visible().eval_guard(&ctx(&map, 1)));
        let wide = EvalContext {
            map: &map,
            unit: 1,
            sight_radius: 2,
        };
        assert!(Expression::enemy_visible().eval_guard(&wide));
    }

    #[test]
    fn test_type_errors_fail_guard() {
        let map = MapRoot::test_env0().unwrap();
        let c = ctx(&map, 1);
        assert!(!Expression::lt(Expression::bool(true), Expression::int(1)).eval_guard(&c));
        assert!(!Expression::int(1).eval_guard(&c));
        assert!(!Expression::new(ExprCode::Not, vec![]).eval_guard(&c));
        assert!(!Expression::equals(Expression::int(1), Expression::bool(true)).eval_guard(&c));
    }
}
