// Carbon Compiler
// Driver: tokenize, parse, resolve imports, analyze and generate bytecode

mod address;
mod bytecode;
mod codegen;
mod function;
mod opcode;

pub use address::{Address, AddressKind};
pub use bytecode::{Bytecode, BytecodeBase, EnumInfo};
pub use codegen::CodeGen;
pub use function::{Function, MEMBER_INITIALIZER, STATIC_INITIALIZER};
pub use opcode::{Opcode, OpcodeWriter};

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::error::{CarbonError, CarbonResult, ErrorKind, Span, Warning};
use crate::lexer::Scanner;
use crate::native::NativeClasses;
use crate::parser::Parser;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// A compiled file and the warnings raised while analyzing it and its imports
pub struct CompileOutput {
    pub bytecode: Rc<Bytecode>,
    pub warnings: Vec<Warning>,
}

pub struct Compiler {
    natives: Rc<NativeClasses>,
    config: Config,
    /// Compiled imports by canonical path
    cache: FxHashMap<PathBuf, Rc<Bytecode>>,
    /// Files currently being compiled, for import cycle detection
    compiling: Vec<PathBuf>,
}

impl Compiler {
    pub fn new(natives: Rc<NativeClasses>, config: Config) -> Self {
        Self {
            natives,
            config,
            cache: FxHashMap::default(),
            compiling: Vec::new(),
        }
    }

    pub fn natives(&self) -> &Rc<NativeClasses> {
        &self.natives
    }

    pub fn compile_file(&mut self, path: &str) -> CarbonResult<CompileOutput> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CarbonError::new(
                ErrorKind::IoError,
                format!("can't read file \"{}\": {}", path, e),
                Span::default(),
                path,
            )
        })?;
        let canonical = Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path));
        self.compiling.push(canonical.clone());
        let result = self.compile_source(&source, path);
        self.compiling.pop();

        let output = result?;
        self.cache.insert(canonical, output.bytecode.clone());
        Ok(output)
    }

    pub fn compile_source(&mut self, source: &str, path: &str) -> CarbonResult<CompileOutput> {
        let tokens = Scanner::new(source, path).scan_tokens()?;
        debug!(file = %path, tokens = tokens.len(), "tokenized");

        let mut file = Parser::new(tokens, path, source).parse()?;

        let mut warnings = Vec::new();
        for i in 0..file.imports.len() {
            let (bytecode, mut imported) = self
                .import(path, &file.imports[i].path)
                .map_err(|e| e.at(file.imports[i].span, path).with_source_if_missing(source))?;
            file.imports[i].bytecode = Some(bytecode);
            warnings.append(&mut imported);
        }

        let mut own = Analyzer::new(&mut file, &self.natives)
            .analyze()
            .map_err(|e| e.with_source_if_missing(source))?;
        debug!(file = %path, warnings = own.len(), "analyzed");

        if self.config.warnings_as_errors {
            if let Some(first) = own.drain(..).next() {
                return Err(first.into_error().with_source(source));
            }
        }
        warnings.append(&mut own);

        let bytecode = CodeGen::new(&file).generate()?;
        Ok(CompileOutput { bytecode, warnings })
    }

    /// Compile an imported file once, relative to the importing file or the import paths
    fn import(&mut self, from: &str, target: &str) -> CarbonResult<(Rc<Bytecode>, Vec<Warning>)> {
        let resolved = self.resolve_import(from, target).ok_or_else(|| {
            CarbonError::runtime(
                ErrorKind::IoError,
                format!("can't find imported file \"{}\".", target),
            )
        })?;
        let canonical = resolved.canonicalize().unwrap_or_else(|_| resolved.clone());

        if self.compiling.contains(&canonical) {
            return Err(CarbonError::runtime(
                ErrorKind::SyntaxError,
                format!("cyclic import of \"{}\".", target),
            ));
        }
        if let Some(bytecode) = self.cache.get(&canonical) {
            return Ok((bytecode.clone(), Vec::new()));
        }

        debug!(import = %canonical.display(), "compiling import");
        let output = self.compile_file(&resolved.to_string_lossy())?;
        Ok((output.bytecode, output.warnings))
    }

    fn resolve_import(&self, from: &str, target: &str) -> Option<PathBuf> {
        let target = Path::new(target);
        if target.is_absolute() {
            return target.is_file().then(|| target.to_path_buf());
        }
        let base = Path::new(from)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        std::iter::once(base)
            .chain(self.config.import_paths.iter().cloned())
            .map(|dir| dir.join(target))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> Compiler {
        Compiler::new(Rc::new(NativeClasses::new()), Config::default())
    }

    #[test]
    fn test_compile_source() {
        let output = compiler()
            .compile_source("func main() { return 0; }", "main.cb")
            .unwrap();
        assert!(output.bytecode.get_function("main").is_some());
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn test_warnings_as_errors() {
        let config = Config {
            warnings_as_errors: true,
            ..Config::default()
        };
        let mut compiler = Compiler::new(Rc::new(NativeClasses::new()), config);
        let err = compiler
            .compile_source("func main() { var x = 1; x; }", "main.cb")
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::SyntaxError);
    }

    #[test]
    fn test_missing_file() {
        let err = compiler()
            .compile_file("/nonexistent/carbon/file.cb")
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::IoError);
    }

    #[test]
    fn test_import_and_cycle() {
        let dir = std::env::temp_dir().join("carbon-import-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("lib.cb"),
            "class Point { var x; func Point(x) { this.x = x; } } func twice(n) = n * 2;",
        )
        .unwrap();
        std::fs::write(dir.join("a.cb"), "import b = \"b.cb\"; func main() {}").unwrap();
        std::fs::write(dir.join("b.cb"), "import a = \"a.cb\";").unwrap();

        let main = dir.join("main.cb");
        std::fs::write(
            &main,
            "import lib = \"lib.cb\"; func main() { var p = lib.Point(2); return lib.twice(p.x); }",
        )
        .unwrap();
        let output = compiler().compile_file(&main.to_string_lossy()).unwrap();
        assert!(output.bytecode.get_extern("lib").is_some());

        let err = compiler()
            .compile_file(&dir.join("a.cb").to_string_lossy())
            .err()
            .unwrap();
        assert!(err.message.contains("cyclic import"));
    }
}
