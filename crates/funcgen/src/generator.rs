use std::fmt::{self, Debug, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::compiler::{CompiledExpr, Compiler, Expression};
use crate::error::{CompileError, Error, EvalError, OptimizeError, panic_message};
use crate::function::Function;
use crate::handler::{
    ClosureHandler, CustomGenerator, ListHandler, MapHandler, MethodHandler, NumberParser, StringConverter, ToBool,
};
use crate::jit::{JitContext, JitMarshal, JitQueue, JitTrigger, JitWorker};
use crate::optimizer::Optimizer;
use crate::options::Options;
use crate::{AstRef, IdentName, Shared, ValueType};

pub(crate) type BinaryImpl<V> = dyn Fn(&V, &V) -> Result<V, EvalError> + Send + Sync;
pub(crate) type UnaryImpl<V> = dyn Fn(&V) -> Result<V, EvalError> + Send + Sync;

/// A registered binary operator.
pub struct Operator<V> {
    pub symbol: SmolStr,
    pub(crate) imp: Shared<BinaryImpl<V>>,
    /// The result only depends on the operands, so constant operands can be folded.
    pub is_pure: bool,
    /// The operands can be swapped and regrouped without changing the result.
    pub is_commutative: bool,
}

impl<V> Operator<V> {
    pub fn apply(&self, a: &V, b: &V) -> Result<V, EvalError> {
        (self.imp)(a, b)
    }
}

impl<V> Clone for Operator<V> {
    fn clone(&self) -> Self {
        Self {
            symbol: self.symbol.clone(),
            imp: Shared::clone(&self.imp),
            is_pure: self.is_pure,
            is_commutative: self.is_commutative,
        }
    }
}

impl<V> Debug for Operator<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("symbol", &self.symbol)
            .field("is_pure", &self.is_pure)
            .field("is_commutative", &self.is_commutative)
            .finish()
    }
}

pub struct UnaryOperator<V> {
    pub symbol: SmolStr,
    pub(crate) imp: Shared<UnaryImpl<V>>,
}

impl<V> UnaryOperator<V> {
    pub fn apply(&self, value: &V) -> Result<V, EvalError> {
        (self.imp)(value)
    }
}

impl<V> Clone for UnaryOperator<V> {
    fn clone(&self) -> Self {
        Self {
            symbol: self.symbol.clone(),
            imp: Shared::clone(&self.imp),
        }
    }
}

impl<V> Debug for UnaryOperator<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryOperator").field("symbol", &self.symbol).finish()
    }
}

/// Registry of everything a tree can refer to, and the entry point of code generation.
///
/// Operators are kept in registration order, which is their priority order from lowest to
/// highest precedence as seen by the parser.
pub struct FunctionGenerator<V> {
    operators: Vec<Operator<V>>,
    operator_index: FxHashMap<SmolStr, usize>,
    unary_operators: Vec<UnaryOperator<V>>,
    unary_index: FxHashMap<SmolStr, usize>,
    pub(crate) static_functions: FxHashMap<IdentName, Function<V>>,
    pub(crate) constants: FxHashMap<IdentName, V>,
    pub(crate) closure_handler: Option<Shared<dyn ClosureHandler<V>>>,
    pub(crate) list_handler: Option<Shared<dyn ListHandler<V>>>,
    pub(crate) map_handler: Option<Shared<dyn MapHandler<V>>>,
    pub(crate) method_handler: Option<Shared<dyn MethodHandler<V>>>,
    pub(crate) custom_generator: Option<Shared<dyn CustomGenerator<V>>>,
    pub(crate) to_bool: Option<ToBool<V>>,
    number_parser: Option<NumberParser<V>>,
    string_converter: Option<StringConverter<V>>,
    jit_marshal: Option<Shared<dyn JitMarshal<V>>>,
    jit_queue: Option<(JitQueue<V>, u64)>,
    pub(crate) options: Options,
}

impl<V> Default for FunctionGenerator<V> {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
            operator_index: FxHashMap::default(),
            unary_operators: Vec::new(),
            unary_index: FxHashMap::default(),
            static_functions: FxHashMap::default(),
            constants: FxHashMap::default(),
            closure_handler: None,
            list_handler: None,
            map_handler: None,
            method_handler: None,
            custom_generator: None,
            to_bool: None,
            number_parser: None,
            string_converter: None,
            jit_marshal: None,
            jit_queue: None,
            options: Options::default(),
        }
    }
}

impl<V: Clone> Clone for FunctionGenerator<V> {
    fn clone(&self) -> Self {
        Self {
            operators: self.operators.clone(),
            operator_index: self.operator_index.clone(),
            unary_operators: self.unary_operators.clone(),
            unary_index: self.unary_index.clone(),
            static_functions: self.static_functions.clone(),
            constants: self.constants.clone(),
            closure_handler: self.closure_handler.clone(),
            list_handler: self.list_handler.clone(),
            map_handler: self.map_handler.clone(),
            method_handler: self.method_handler.clone(),
            custom_generator: self.custom_generator.clone(),
            to_bool: self.to_bool,
            number_parser: self.number_parser,
            string_converter: self.string_converter,
            jit_marshal: self.jit_marshal.clone(),
            jit_queue: self.jit_queue.clone(),
            options: self.options.clone(),
        }
    }
}

impl<V: ValueType> FunctionGenerator<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pure binary operator. Registering a symbol again replaces the
    /// implementation and keeps its priority.
    pub fn add_op<F>(&mut self, symbol: &str, is_commutative: bool, imp: F) -> &mut Self
    where
        F: Fn(&V, &V) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        self.add_op_pure(symbol, is_commutative, imp, true)
    }

    pub fn add_op_pure<F>(&mut self, symbol: &str, is_commutative: bool, imp: F, is_pure: bool) -> &mut Self
    where
        F: Fn(&V, &V) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        let operator = Operator {
            symbol: SmolStr::new(symbol),
            imp: Shared::new(imp),
            is_pure,
            is_commutative,
        };
        match self.operator_index.get(symbol) {
            Some(&index) => self.operators[index] = operator,
            None => {
                self.operator_index
                    .insert(operator.symbol.clone(), self.operators.len());
                self.operators.push(operator);
            }
        }
        self
    }

    pub fn add_unary<F>(&mut self, symbol: &str, imp: F) -> &mut Self
    where
        F: Fn(&V) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        let operator = UnaryOperator {
            symbol: SmolStr::new(symbol),
            imp: Shared::new(imp),
        };
        match self.unary_index.get(symbol) {
            Some(&index) => self.unary_operators[index] = operator,
            None => {
                self.unary_index
                    .insert(operator.symbol.clone(), self.unary_operators.len());
                self.unary_operators.push(operator);
            }
        }
        self
    }

    pub fn add_static_function(&mut self, name: &str, function: Function<V>) -> &mut Self {
        self.static_functions.insert(IdentName::new(name), function.named(name));
        self
    }

    /// Registers a pure function of one argument.
    pub fn add_simple_function<F>(&mut self, name: &str, func: F) -> &mut Self
    where
        F: Fn(&V) -> Result<V, EvalError> + Send + Sync + 'static,
    {
        self.add_static_function(name, Function::simple(func))
    }

    pub fn add_constant(&mut self, name: &str, value: V) -> &mut Self {
        self.constants.insert(IdentName::new(name), value);
        self
    }

    pub fn set_closure_handler(&mut self, handler: impl ClosureHandler<V> + 'static) -> &mut Self {
        self.closure_handler = Some(Shared::new(handler));
        self
    }

    pub fn set_list_handler(&mut self, handler: impl ListHandler<V> + 'static) -> &mut Self {
        self.list_handler = Some(Shared::new(handler));
        self
    }

    pub fn set_map_handler(&mut self, handler: impl MapHandler<V> + 'static) -> &mut Self {
        self.map_handler = Some(Shared::new(handler));
        self
    }

    pub fn set_method_handler(&mut self, handler: impl MethodHandler<V> + 'static) -> &mut Self {
        self.method_handler = Some(Shared::new(handler));
        self
    }

    pub fn set_custom_generator(&mut self, generator: impl CustomGenerator<V> + 'static) -> &mut Self {
        self.custom_generator = Some(Shared::new(generator));
        self
    }

    pub fn set_to_bool(&mut self, to_bool: ToBool<V>) -> &mut Self {
        self.to_bool = Some(to_bool);
        self
    }

    pub fn set_number_parser(&mut self, parser: NumberParser<V>) -> &mut Self {
        self.number_parser = Some(parser);
        self
    }

    pub fn set_string_converter(&mut self, converter: StringConverter<V>) -> &mut Self {
        self.string_converter = Some(converter);
        self
    }

    pub fn set_optimize(&mut self, optimize: bool) -> &mut Self {
        self.options.optimize = optimize;
        self
    }

    /// Enables escalation for closure literals compiled from now on. Closures can then be
    /// escalated with [`jit::escalate`](crate::jit::escalate) or a [`JitWorker`].
    pub fn set_jit_marshal(&mut self, marshal: impl JitMarshal<V> + 'static) -> &mut Self {
        self.jit_marshal = Some(Shared::new(marshal));
        self
    }

    /// Queues closures compiled from now on to `worker` once they were called as often as
    /// the worker's threshold. Has no effect without a [`JitMarshal`].
    pub fn set_jit_worker(&mut self, worker: &JitWorker<V>) -> &mut Self {
        self.jit_queue = Some((worker.queue(), worker.threshold()));
        self
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Registered binary operators in priority order.
    pub fn operators(&self) -> &[Operator<V>] {
        &self.operators
    }

    pub fn unary_operators(&self) -> &[UnaryOperator<V>] {
        &self.unary_operators
    }

    pub fn operator(&self, symbol: &str) -> Option<&Operator<V>> {
        self.operator_index.get(symbol).map(|&index| &self.operators[index])
    }

    pub fn unary_operator(&self, symbol: &str) -> Option<&UnaryOperator<V>> {
        self.unary_index.get(symbol).map(|&index| &self.unary_operators[index])
    }

    pub fn static_function(&self, name: &str) -> Option<&Function<V>> {
        self.static_functions.get(name)
    }

    pub fn constant(&self, name: &str) -> Option<&V> {
        self.constants.get(name)
    }

    pub fn number_parser(&self) -> Option<NumberParser<V>> {
        self.number_parser
    }

    pub fn string_converter(&self) -> Option<StringConverter<V>> {
        self.string_converter
    }

    pub(crate) fn jit_context(&self) -> Option<Shared<JitContext<V>>> {
        let marshal = self.jit_marshal.clone()?;
        let trigger = self
            .jit_queue
            .as_ref()
            .map(|(queue, threshold)| JitTrigger {
                queue: queue.clone(),
                threshold: *threshold,
            });
        Some(Shared::new(JitContext { marshal, trigger }))
    }

    /// Folds constants in `ast` using the registered operators, constants and functions.
    pub fn optimize(&self, ast: &AstRef<V>) -> Result<AstRef<V>, OptimizeError> {
        Optimizer::new(self).optimize(ast)
    }

    /// Compiles a node without optimizing it, for use by a [`CustomGenerator`] that needs
    /// to compile child nodes.
    pub fn compile_node(&self, node: &AstRef<V>) -> Result<CompiledExpr<V>, CompileError> {
        Compiler::new(self).compile(node)
    }

    /// Compiles `ast` into an expression, folding constants first unless disabled.
    pub fn generate(&self, ast: &AstRef<V>) -> Result<Expression<V>, Error> {
        catch_unwind(AssertUnwindSafe(|| -> Result<Expression<V>, Error> {
            let ast = if self.options.optimize {
                let optimized = self.optimize(ast)?;
                tracing::debug!(
                    nodes = ast.node_count(),
                    optimized = optimized.node_count(),
                    "optimized expression"
                );
                optimized
            } else {
                Shared::clone(ast)
            };

            let compiled = self.compile_node(&ast)?;
            tracing::debug!(nodes = ast.node_count(), "generated expression");
            Ok(Expression::new(compiled, ast))
        }))
        .unwrap_or_else(|payload| {
            Err(Error::from(CompileError::Panic {
                message: panic_message(payload),
            }))
        })
    }
}

impl<V> Debug for FunctionGenerator<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&IdentName> = self.static_functions.keys().collect();
        functions.sort();
        f.debug_struct("FunctionGenerator")
            .field(
                "operators",
                &self.operators.iter().map(|op| op.symbol.as_str()).collect::<Vec<_>>(),
            )
            .field(
                "unary_operators",
                &self.unary_operators.iter().map(|op| op.symbol.as_str()).collect::<Vec<_>>(),
            )
            .field("static_functions", &functions)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
