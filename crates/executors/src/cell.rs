//! The "cell interpreter" (§4.4): a persistent, stateful script session per
//! container process, standing in for the original's stateful Python
//! kernel. Grounded on the spec's explicit ambient-stack decision to host
//! an embeddable-script VM (`rune`) here, named generically rather than
//! "python", with the wire contract (stdout/stderr capture, `isError`
//! semantics, cross-call variable persistence) kept identical.
//!
//! Rune has no REPL-style "persist locals into the next compilation unit"
//! primitive, so statefulness is implemented by replaying every
//! successfully-executed cell's source ahead of the new one inside a single
//! `fn main()` body — one `vm.call` per cell, not one per cell plus a
//! separate replay pass. Because that single call re-executes every prior
//! cell's statements too, the captured stdout is the *cumulative* output of
//! the whole history plus the new cell; each cell's own output is recovered
//! by stripping the previously recorded cumulative prefix off the front of
//! it. This assumes cell bodies are side-effect deterministic (no
//! randomness, no I/O other than the captured stdout) so that replaying a
//! prior cell reproduces exactly the output it produced the first time;
//! acceptable for the scripted/compute cells this kernel targets.

use std::sync::{Arc, Mutex};

use rune::{Context, Diagnostics, Source, Sources, Vm};
use rune_modules::capture_io::{self, CaptureIo};

use crate::error::CellError;

pub struct CellInterpreter {
    context: Arc<Context>,
    runtime: Arc<rune::runtime::RuntimeContext>,
    io: CaptureIo,
    /// `(source, stdout)` per successfully executed cell, in order. The
    /// second element is what that cell's own output was, not replayed
    /// output — used to strip the now-familiar prefix off a later replay's
    /// cumulative stdout.
    history: Mutex<Vec<(String, String)>>,
}

impl CellInterpreter {
    pub fn new() -> Result<Self, CellError> {
        let io = CaptureIo::new();
        let mut context =
            rune_modules::default_context().map_err(|e| CellError::Eval(e.to_string()))?;
        capture_io::enable(&mut context, &io).map_err(|e| CellError::Eval(e.to_string()))?;
        let runtime = Arc::new(
            context
                .runtime()
                .map_err(|e| CellError::Eval(e.to_string()))?,
        );

        Ok(Self {
            context: Arc::new(context),
            runtime,
            io,
            history: Mutex::new(Vec::new()),
        })
    }

    /// Runs one cell. Returns `(stdout, stderr)` holding only *this* cell's
    /// own output, not the replayed history's; `stderr` is non-empty iff
    /// compilation or execution failed, matching the generic router's
    /// `isError = !stderr.is_empty()` contract.
    pub fn eval(&self, code: &str) -> Result<(String, String), CellError> {
        if code.trim().is_empty() {
            return Err(CellError::EmptyCode);
        }

        let mut history = self.history.lock().unwrap();

        let prior_source: String = history
            .iter()
            .map(|(source, _)| source.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let prior_stdout: String = history.iter().map(|(_, stdout)| stdout.as_str()).collect();

        let combined = format!("{prior_source}\n{code}");
        match self.run(&combined) {
            Ok(()) => {
                let cumulative = self.io.drain_utf8().unwrap_or_default();
                // The replay is assumed deterministic, so `cumulative`
                // starts with exactly `prior_stdout`; strip it to recover
                // just this cell's output. If that assumption is somehow
                // violated, fall back to returning the whole thing rather
                // than silently truncating output.
                let stdout = cumulative
                    .strip_prefix(prior_stdout.as_str())
                    .map(str::to_string)
                    .unwrap_or(cumulative);
                history.push((code.to_string(), stdout.clone()));
                Ok((stdout, String::new()))
            }
            Err(e) => {
                let _ = self.io.drain_utf8();
                Ok((String::new(), e.to_string()))
            }
        }
    }

    fn run(&self, body: &str) -> Result<(), CellError> {
        let wrapped = format!("pub fn main() {{\n{body}\n}}");

        let mut sources = Sources::new();
        sources
            .insert(Source::new("cell", &wrapped).map_err(|e| CellError::Eval(e.to_string()))?)
            .map_err(|e| CellError::Eval(e.to_string()))?;

        let mut diagnostics = Diagnostics::new();
        let result = rune::prepare(&mut sources)
            .with_context(&self.context)
            .with_diagnostics(&mut diagnostics)
            .build();

        if !diagnostics.is_empty() {
            let mut out = String::new();
            let _ = diagnostics.emit(&mut rune::termcolor::NoColor::new(&mut out), &sources);
            if diagnostics.has_error() {
                return Err(CellError::Eval(out));
            }
        }

        let unit = result.map_err(|e| CellError::Eval(e.to_string()))?;
        let mut vm = Vm::new(self.runtime.clone(), Arc::new(unit));
        vm.call(["main"], ())
            .map_err(|e| CellError::Eval(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_is_rejected() {
        let interpreter = CellInterpreter::new().unwrap();
        let err = interpreter.eval("   ").unwrap_err();
        assert!(matches!(err, CellError::EmptyCode));
    }

    #[test]
    fn simple_print_is_captured_on_stdout() {
        let interpreter = CellInterpreter::new().unwrap();
        let (stdout, stderr) = interpreter.eval("println!(\"hi\");").unwrap();
        assert_eq!(stdout, "hi\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn variables_persist_across_cells() {
        let interpreter = CellInterpreter::new().unwrap();
        let (_, stderr) = interpreter.eval("let x = 41;").unwrap();
        assert!(stderr.is_empty());
        let (stdout, stderr) = interpreter.eval("println!(\"{}\", x + 1);").unwrap();
        assert_eq!(stdout, "42\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn each_cell_returns_only_its_own_stdout() {
        let interpreter = CellInterpreter::new().unwrap();
        let (first, stderr) = interpreter.eval("println!(\"a\");").unwrap();
        assert_eq!(first, "a\n");
        assert!(stderr.is_empty());

        let (second, stderr) = interpreter.eval("println!(\"b\");").unwrap();
        assert_eq!(second, "b\n");
        assert!(stderr.is_empty());

        let (third, stderr) = interpreter.eval("println!(\"c\");").unwrap();
        assert_eq!(third, "c\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn compile_error_is_reported_as_stderr_not_err() {
        let interpreter = CellInterpreter::new().unwrap();
        let (stdout, stderr) = interpreter.eval("this is not valid syntax ###").unwrap();
        assert!(stdout.is_empty());
        assert!(!stderr.is_empty());
    }
}
