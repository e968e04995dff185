//! Public interface for compiling and running programs.
//!
//! [`Runner`] owns the full pipeline for one source file: lex, parse,
//! analyze, emit. Compilation happens in `new`; diagnostics abort before any
//! bytecode exists. `run` executes against a fresh heap and global array and
//! tears both down deterministically when the program ends.

use std::{path::Path, sync::Arc};

use crate::{
    analyze::Analyzer,
    bytecode::{self, Code, ConstPool, EmitCtx},
    errors::{Diagnostics, RunResult},
    intern::Interns,
    io::PrintWriter,
    lex, parse,
    vm::{NativeDef, NativeRegistry, Vm, VmState},
};

/// A compiled program, ready to run any number of times.
#[derive(Debug)]
pub struct Runner {
    interns: Interns,
    pool: ConstPool,
    code: Arc<Code>,
    natives: NativeRegistry,
    nglobals: u16,
}

impl Runner {
    /// Compiles `source`. Imports resolve relative to the source file's
    /// directory.
    ///
    /// # Errors
    /// Returns the collected diagnostics when the program does not compile;
    /// the emitter never runs on a program with errors.
    pub fn new(source: &str, filename: &str) -> Result<Self, Diagnostics> {
        Self::with_natives(source, filename, Vec::new())
    }

    /// Compiles `source` with host native functions in scope.
    ///
    /// Natives resolve like builtins: by name and signature, without
    /// occupying a variable slot.
    pub fn with_natives(
        source: &str,
        filename: &str,
        natives: Vec<NativeDef>,
    ) -> Result<Self, Diagnostics> {
        let mut diags = Diagnostics::new(filename);
        let tokens = lex::lex(source, &mut diags);

        let base_dir = Path::new(filename)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut stmts = parse::parse(&tokens, base_dir, &mut diags);

        let mut analyzer = Analyzer::new();
        let mut registry = NativeRegistry::new();
        for def in natives {
            let (name, params, ret) = (def.name.clone(), def.params.clone(), def.ret.clone());
            let id = registry.register(def);
            analyzer.register_native(&name, params, ret, id);
        }

        let analysis = analyzer.analyze(&mut stmts, &mut diags);
        if !diags.is_empty() {
            return Err(diags);
        }

        let mut interns = Interns::new();
        let mut pool = ConstPool::new();
        let mut ctx = EmitCtx {
            vars: &analyzer.vars,
            interns: &mut interns,
            pool: &mut pool,
        };
        let code = bytecode::compile_program(&stmts, &mut ctx);

        Ok(Self {
            interns,
            pool,
            code: Arc::new(code),
            natives: registry,
            nglobals: analysis.nglobals,
        })
    }

    /// Executes the program to completion, writing builtin output through
    /// `writer`.
    ///
    /// # Errors
    /// Returns the runtime error that reached the top frame uncaught.
    pub fn run(&self, writer: &mut impl PrintWriter) -> RunResult<()> {
        let mut state = VmState::new();
        state.grow_globals(self.nglobals);
        let result = {
            let mut vm = Vm {
                pool: &self.pool,
                interns: &self.interns,
                natives: &self.natives,
                state: &mut state,
                writer,
            };
            vm.run(Arc::clone(&self.code), false)
        };
        state.teardown();
        result.map(|_| ())
    }
}
