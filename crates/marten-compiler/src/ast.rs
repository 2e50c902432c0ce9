//! Abstract syntax tree consumed by the code generator
//!
//! The tree is produced by the parser with source line numbers already
//! attached; the generator only reads it. Every node kind the generator
//! understands is listed here, so lowering can match exhaustively.

/// A sequence of statements with an optional trailing `return`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Line of the token that closed the block.
    pub last_line: u32,
    /// Statements in source order.
    pub stats: Vec<Stat>,
    /// `None` when the block has no `return` statement; `Some(vec![])`
    /// for a bare `return`.
    pub ret_exps: Option<Vec<Expr>>,
}

/// One arm of an `if` / `else if` chain.
///
/// The `else` arm is represented with a constant-true condition, so the
/// generator treats every arm uniformly.
#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    /// Short statement list run before the condition, scoped to the arm.
    pub init: Vec<Stat>,
    /// Branch condition.
    pub cond: Expr,
    /// Arm body.
    pub body: Block,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    /// Lone semicolon.
    Empty,
    /// `break`
    Break {
        /// Source line, for error reporting and jump line info.
        line: u32,
    },
    /// `continue`
    Continue {
        /// Source line, for error reporting and jump line info.
        line: u32,
    },
    /// A nested block introducing a scope.
    Block(Box<Block>),
    /// The unified loop form. `while cond` has empty `init` and no
    /// `step`; the three-clause form carries both.
    Loop {
        /// Init statements, scoped to the loop.
        init: Vec<Stat>,
        /// Loop condition, tested before each iteration.
        cond: Expr,
        /// Step statement run after the body, before re-testing.
        step: Option<Box<Stat>>,
        /// Loop body.
        body: Block,
    },
    /// `if` / `else if` / `else` chain.
    If {
        /// The arms in source order; a final `else` is an arm with a
        /// constant-true condition.
        arms: Vec<IfArm>,
    },
    /// Iterator loop: `for a, b in explist { ... }`.
    ForIn {
        /// Line of the token opening the body.
        line_of_body: u32,
        /// Loop variable names.
        names: Vec<String>,
        /// Iterator expression list.
        exps: Vec<Expr>,
        /// Loop body.
        body: Block,
    },
    /// `lhs, ... = rhs, ...`
    Assign {
        /// Line of the last token of the statement.
        last_line: u32,
        /// Assignment targets; names or index expressions.
        targets: Vec<Expr>,
        /// Right-hand side expression list.
        values: Vec<Expr>,
    },
    /// `local a, b = ...` (or `a, b := ...`).
    LocalDecl {
        /// Line of the last token of the statement.
        last_line: u32,
        /// Declared names.
        names: Vec<String>,
        /// Initializer expression list, possibly empty.
        values: Vec<Expr>,
    },
    /// A call in statement position; all results are discarded.
    Call(Call),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
    /// Bitwise not.
    BNot,
    /// Length.
    Len,
}

/// Binary operators with dedicated opcodes (or comparison lowering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    IDiv,
    /// `%`
    Mod,
    /// `^`
    Pow,
    /// `&`
    BAnd,
    /// `|`
    BOr,
    /// `~`
    BXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Short-circuit logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOp {
    /// `and` / `&&`
    And,
    /// `or` / `||`
    Or,
}

/// A function or method call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Line of the opening parenthesis.
    pub line: u32,
    /// Line of the closing parenthesis.
    pub last_line: u32,
    /// Callee expression; for a method call, the receiver.
    pub callee: Box<Expr>,
    /// Method name for `obj:m(...)` sugar, `None` for a plain call.
    pub method: Option<String>,
    /// Argument expression list.
    pub args: Vec<Expr>,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `nil`
    Nil {
        /// Source line.
        line: u32,
    },
    /// `true`
    True {
        /// Source line.
        line: u32,
    },
    /// `false`
    False {
        /// Source line.
        line: u32,
    },
    /// `...`
    Vararg {
        /// Source line.
        line: u32,
    },
    /// Integer literal.
    Integer {
        /// Source line.
        line: u32,
        /// Literal value.
        value: i64,
    },
    /// Float literal.
    Float {
        /// Source line.
        line: u32,
        /// Literal value.
        value: f64,
    },
    /// String literal.
    Str {
        /// Source line.
        line: u32,
        /// Literal value.
        value: String,
    },
    /// Name reference; resolved to a local, upvalue, or global at
    /// generation time.
    Name {
        /// Source line.
        line: u32,
        /// Identifier text.
        name: String,
    },
    /// Parenthesized expression; truncates multi-value operands to one.
    Paren(Box<Expr>),
    /// Unary operator application.
    Unary {
        /// Line of the operator token.
        line: u32,
        /// The operator.
        op: UnOp,
        /// Operand.
        expr: Box<Expr>,
    },
    /// Binary operator application.
    Binary {
        /// Line of the operator token.
        line: u32,
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Chain of one short-circuit operator, flattened by the parser.
    Logical {
        /// Line of the first operator token.
        line: u32,
        /// The operator; uniform across the chain.
        op: LogOp,
        /// Two or more operands.
        exps: Vec<Expr>,
    },
    /// Concatenation chain, flattened by the parser.
    Concat {
        /// Line of the last `..` token.
        line: u32,
        /// Two or more operands.
        exps: Vec<Expr>,
    },
    /// Table constructor. `keys` and `values` are parallel; a `None`
    /// key marks a positional (array-part) entry.
    Table {
        /// Line of the opening brace.
        line: u32,
        /// Line of the closing brace.
        last_line: u32,
        /// Entry keys, `None` for positional entries.
        keys: Vec<Option<Expr>>,
        /// Entry values, parallel to `keys`.
        values: Vec<Expr>,
    },
    /// Function literal.
    Function {
        /// Line of the `func` keyword.
        line: u32,
        /// Line of the closing brace.
        last_line: u32,
        /// Parameter names.
        params: Vec<String>,
        /// True if the parameter list ends with `...`.
        is_vararg: bool,
        /// Function body.
        body: Box<Block>,
    },
    /// Indexing: `obj[key]` or `obj.key` sugar.
    Index {
        /// Line of the last token of the expression.
        last_line: u32,
        /// Indexed expression.
        obj: Box<Expr>,
        /// Key expression.
        key: Box<Expr>,
    },
    /// Call in expression position.
    Call(Call),
}

impl Expr {
    /// True for expressions whose result count depends on context.
    pub fn is_multi_value(&self) -> bool {
        matches!(self, Expr::Vararg { .. } | Expr::Call(_))
    }

    /// Line on which evaluation of the expression begins.
    pub fn line(&self) -> u32 {
        match self {
            Expr::Nil { line }
            | Expr::True { line }
            | Expr::False { line }
            | Expr::Vararg { line }
            | Expr::Integer { line, .. }
            | Expr::Float { line, .. }
            | Expr::Str { line, .. }
            | Expr::Name { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Logical { line, .. }
            | Expr::Concat { line, .. }
            | Expr::Table { line, .. }
            | Expr::Function { line, .. } => *line,
            Expr::Paren(inner) => inner.line(),
            Expr::Index { obj, .. } => obj.line(),
            Expr::Call(call) => call.line,
        }
    }

    /// Line on which evaluation of the expression ends.
    pub fn last_line(&self) -> u32 {
        match self {
            Expr::Table { last_line, .. }
            | Expr::Function { last_line, .. }
            | Expr::Index { last_line, .. } => *last_line,
            Expr::Paren(inner) => inner.last_line(),
            Expr::Call(call) => call.last_line,
            other => other.line(),
        }
    }
}

/// Drop trailing `nil` literals from an expression list. Declarations and
/// assignments use this so trailing nils cost a LOADNIL rather than a
/// constant load per name.
pub(crate) fn strip_trailing_nils(exps: &[Expr]) -> &[Expr] {
    let mut n = exps.len();
    while n > 0 {
        match &exps[n - 1] {
            Expr::Nil { .. } => n -= 1,
            _ => break,
        }
    }
    &exps[..n]
}
