//! The subset of the typed syntax tree that the lowering stage inspects
//! structurally. Every expression carries the node id under which the
//! analyzer recorded its inferred type.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Positional,
    Named,
    /// A `*args`-style variadic positional argument.
    Star,
    /// A `**kwargs`-style variadic keyword argument.
    Star2,
}

#[derive(Debug)]
pub struct Expr<'ctx> {
    pub id: NodeId,
    pub kind: ExprKind<'ctx>,
}

impl<'ctx> Expr<'ctx> {
    pub fn new(id: NodeId, kind: ExprKind<'ctx>) -> Self {
        Self { id, kind }
    }
}

#[derive(Debug)]
pub enum ExprKind<'ctx> {
    Name(NameRef<'ctx>),
    Member {
        receiver: Box<Expr<'ctx>>,
        name: &'ctx str,
        fullname: Option<&'ctx str>,
    },
    Call(Box<CallExpr<'ctx>>),
    Comprehension(Box<Comprehension<'ctx>>),
    IntLit(i128),
    BoolLit(bool),
    StrLit(&'ctx str),
    BytesLit(&'ctx [u8]),
    TupleLit(Vec<Expr<'ctx>>),
    ListLit(Vec<Expr<'ctx>>),
}

/// A reference to a local, global or intrinsic. The fullname is present only
/// when the analyzer resolved the name to a module-level definition.
#[derive(Debug)]
pub struct NameRef<'ctx> {
    pub name: &'ctx str,
    pub fullname: Option<&'ctx str>,
}

#[derive(Debug)]
pub struct CallExpr<'ctx> {
    pub callee: Expr<'ctx>,
    pub args: Vec<Expr<'ctx>>,
    pub arg_kinds: Vec<ArgKind>,
    pub arg_names: Vec<Option<&'ctx str>>,
}

impl<'ctx> CallExpr<'ctx> {
    pub fn positional(callee: Expr<'ctx>, args: Vec<Expr<'ctx>>) -> Self {
        let arg_kinds = vec![ArgKind::Positional; args.len()];
        let arg_names = vec![None; args.len()];
        Self {
            callee,
            args,
            arg_kinds,
            arg_names,
        }
    }

    pub fn all_positional(&self) -> bool {
        self.arg_kinds.iter().all(|&kind| kind == ArgKind::Positional)
    }

    /// Finds an argument either at a positional index or under a keyword.
    pub fn arg(&self, index: usize, name: &str) -> Option<&Expr<'ctx>> {
        self.args
            .iter()
            .zip(&self.arg_kinds)
            .zip(&self.arg_names)
            .enumerate()
            .find_map(|(i, ((arg, &kind), &arg_name))| match kind {
                ArgKind::Positional if i == index => Some(arg),
                ArgKind::Named if arg_name == Some(name) => Some(arg),
                _ => None,
            })
    }
}

/// A single-clause comprehension: `element for index in sequence if conditions`.
#[derive(Debug)]
pub struct Comprehension<'ctx> {
    pub element: Expr<'ctx>,
    pub index: &'ctx str,
    pub sequence: Expr<'ctx>,
    pub conditions: Vec<Expr<'ctx>>,
}

/// Extracts a compile-time boolean from an expression, declining anything
/// that is not a literal `true` or `false`.
pub fn parse_bool_literal(expr: &Expr<'_>) -> Option<bool> {
    match &expr.kind {
        ExprKind::BoolLit(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(id: u32, value: i128) -> Expr<'static> {
        Expr::new(NodeId(id), ExprKind::IntLit(value))
    }

    #[test]
    fn keyword_argument_lookup() {
        let callee = Expr::new(
            NodeId(0),
            ExprKind::Name(NameRef {
                name: "f",
                fullname: Some("mod.f"),
            }),
        );
        let call = CallExpr {
            callee,
            args: vec![int(1, 10), int(2, 20)],
            arg_kinds: vec![ArgKind::Positional, ArgKind::Named],
            arg_names: vec![None, Some("errors")],
        };

        assert!(matches!(call.arg(0, "value"), Some(expr) if expr.id == NodeId(1)));
        assert!(matches!(call.arg(1, "errors"), Some(expr) if expr.id == NodeId(2)));
        assert!(call.arg(1, "encoding").is_none());
        assert!(!call.all_positional());
    }

    #[test]
    fn bool_literal_extraction() {
        let yes = Expr::new(NodeId(0), ExprKind::BoolLit(true));
        assert_eq!(parse_bool_literal(&yes), Some(true));
        assert_eq!(parse_bool_literal(&int(1, 1)), None);
    }
}
