//! The stateful REPL session.
//!
//! Each submission re-enters the full pipeline — lex, parse, analyze, emit —
//! with the session's persistent analyzer scope as the root, so globals,
//! functions, user types and operator overloads defined on earlier lines
//! stay visible. The literal pool, heap and global array live as long as the
//! session; every submission appends fresh code and runs it against them.

use std::{path::Path, sync::Arc};

use crate::{
    analyze::Analyzer,
    bytecode::{self, ConstPool, EmitCtx},
    errors::{Diagnostics, ReplError},
    heap::HeapStats,
    intern::Interns,
    io::PrintWriter,
    lex, parse,
    vm::{NativeRegistry, Vm, VmState},
};

/// A persistent REPL session.
#[derive(Debug)]
pub struct ReplSession {
    analyzer: Analyzer,
    interns: Interns,
    pool: ConstPool,
    natives: NativeRegistry,
    state: VmState,
}

impl Default for ReplSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            analyzer: Analyzer::new(),
            interns: Interns::new(),
            pool: ConstPool::new(),
            natives: NativeRegistry::new(),
            state: VmState::new(),
        }
    }

    /// Compiles and runs one submission.
    ///
    /// When the submission's final statement is an expression, its value is
    /// rendered as `value: type` and returned for display. A missing
    /// trailing `;` is supplied, so `1 + 2` works as-is.
    ///
    /// # Errors
    /// Compile diagnostics and runtime errors are both reported per
    /// submission; the session stays usable afterwards.
    pub fn feed(
        &mut self,
        line: &str,
        writer: &mut impl PrintWriter,
    ) -> Result<Option<String>, ReplError> {
        let mut source = line.trim_end().to_owned();
        if !(source.ends_with(';') || source.ends_with('}')) {
            source.push(';');
        }

        let mut diags = Diagnostics::new("<stdin>");
        let tokens = lex::lex(&source, &mut diags);
        let mut stmts = parse::parse(&tokens, Path::new("."), &mut diags);
        let analysis = self.analyzer.analyze(&mut stmts, &mut diags);
        if !diags.is_empty() {
            return Err(ReplError::Compile(diags));
        }

        let mut ctx = EmitCtx {
            vars: &self.analyzer.vars,
            interns: &mut self.interns,
            pool: &mut self.pool,
        };
        let code = bytecode::compile_repl(&stmts, &mut ctx, analysis.last_is_expr);

        self.state.grow_globals(analysis.nglobals);
        let result = {
            let mut vm = Vm {
                pool: &self.pool,
                interns: &self.interns,
                natives: &self.natives,
                state: &mut self.state,
                writer,
            };
            vm.run(Arc::new(code), analysis.last_is_expr)?
        };

        Ok(result.map(|value| {
            let text = format!(
                "{}: {}",
                value.repr(&self.state.heap, &self.interns, &self.pool),
                value.type_name(&self.state.heap)
            );
            value.drop_with_heap(&mut self.state.heap);
            text
        }))
    }

    /// Heap occupancy of the session, for telemetry and leak tests.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.state.heap.stats()
    }

    /// Releases every global the session holds. Called automatically on
    /// drop; exposed so tests can assert the heap drains.
    pub fn teardown(&mut self) {
        self.state.teardown();
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        self.state.teardown();
    }
}
