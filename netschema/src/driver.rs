use codespan_reporting::diagnostic::{Diagnostic, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};
use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::schema::types::ContractViolation;
use crate::schema::{pretty, NotationRegistry, Schema};
use crate::source::FileId;
use crate::xml;
use crate::COMPILER_VERSION;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }
}

/// Loads schema files and reports on them.
pub struct Driver {
    files: SimpleFiles<String, String>,
    notations: &'static NotationRegistry,

    seen_errors: RefCell<bool>,
    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: RefCell<Box<dyn WriteColor>>,

    emit_width: usize,
    emit_writer: RefCell<Box<dyn WriteColor>>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            files: SimpleFiles::new(),
            notations: NotationRegistry::global(),

            seen_errors: RefCell::new(false),
            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: RefCell::new(Box::new(BufferedStandardStream::stderr(
                color_choice(atty::Stream::Stderr),
            ))),

            emit_width: usize::MAX,
            emit_writer: RefCell::new(Box::new(BufferedStandardStream::stdout(color_choice(
                atty::Stream::Stdout,
            )))),
        }
    }

    /// Setup a global panic hook
    pub fn install_panic_hook(&self) {
        let term_config = self.codespan_config.clone();
        // The default hook prints the panic message and an optional backtrace
        let default_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let location = info.location();
            let payload = info.payload();
            let message = if let Some(violation) = payload.downcast_ref::<ContractViolation>() {
                violation.to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_owned()
            } else {
                "unknown panic type".to_owned()
            };

            let diagnostic = Diagnostic::bug()
                .with_message(format!("schema compiler panicked at '{message}'"))
                .with_notes(vec![
                    match location {
                        Some(location) => format!("panicked at: {location}"),
                        None => "panicked at: unknown location".to_owned(),
                    },
                    format!("please report this as a bug in {COMPILER_VERSION}"),
                ]);

            let mut writer = BufferedStandardStream::stderr(color_choice(atty::Stream::Stderr));
            let dummy_files = SimpleFiles::<String, String>::new();

            default_hook(info);
            eprintln!();
            // Nothing more can be reported if stderr is gone
            let _ = codespan_reporting::term::emit(
                &mut writer,
                &term_config,
                &dummy_files,
                &diagnostic,
            );
            let _ = writer.flush();
        }));
    }

    /// Use a notation registry other than the process wide one.
    pub fn set_notations(&mut self, notations: &'static NotationRegistry) {
        self.notations = notations;
    }

    /// Set the writer to use when rendering diagnostics
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Set the width to use when printing schemas
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when printing schemas
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Load a source string into the file database.
    pub fn load_source_string(&mut self, name: String, source: String) -> FileId {
        self.files.add(name, source)
    }

    /// Load a source file into the file database using a reader.
    pub fn load_source(&mut self, name: String, mut reader: impl Read) -> Option<FileId> {
        let mut source = String::new();
        match reader.read_to_string(&mut source) {
            Ok(_) => Some(self.load_source_string(name, source)),
            Err(error) => {
                self.emit_read_diagnostic(name, error);
                None
            }
        }
    }

    /// Load a source file into the file database from the given path.
    pub fn load_source_path(&mut self, path: &Path) -> Option<FileId> {
        match std::fs::File::open(path) {
            Ok(file) => self.load_source(path.display().to_string(), file),
            Err(error) => {
                self.emit_read_diagnostic(path.display(), error);
                None
            }
        }
    }

    /// Build a schema from the given files, reporting any errors.
    pub fn check_schemas(&self, file_ids: &[FileId]) -> Status {
        self.build_schema(file_ids);
        self.status()
    }

    /// Build a schema from the given files and print it. With `type_name`
    /// only the definition of that type is printed.
    pub fn dump_schemas(&self, file_ids: &[FileId], type_name: Option<&str>) -> Status {
        let schema = match self.build_schema(file_ids) {
            Some(schema) => schema,
            None => return self.status(),
        };

        let scope = scoped_arena::Scope::new();
        let context = pretty::Context::new(&schema, &scope);

        match type_name {
            None => self.emit_doc(context.schema().into_doc()),
            Some(name) => match schema.lookup_qualified(name) {
                Some(r#type) => self.emit_doc(context.definition(name, r#type).into_doc()),
                None => self.emit_diagnostic(
                    Diagnostic::error().with_message(format!("cannot find type `{name}`")),
                ),
            },
        }

        self.status()
    }

    /// Print the registered notations and the element kind each applies to.
    pub fn emit_notations(&self) -> Status {
        let mut emit_writer = self.emit_writer.borrow_mut();
        for notation in self.notations.iter() {
            if let Err(error) = writeln!(
                emit_writer,
                "{} array of {}",
                notation.name(),
                notation.element_kind(),
            ) {
                warn!(%error, "failed to write notations");
                return Status::Error;
            }
        }
        if let Err(error) = emit_writer.flush() {
            warn!(%error, "failed to write notations");
        }

        self.status()
    }

    fn status(&self) -> Status {
        if *self.seen_errors.borrow() {
            Status::Error
        } else {
            Status::Ok
        }
    }

    /// Read and load each file in turn, stopping at the first error.
    fn build_schema(&self, file_ids: &[FileId]) -> Option<Schema> {
        let mut schema = Schema::with_builtins();

        for &file_id in file_ids {
            let file = match self.files.get(file_id) {
                Ok(file) => file,
                Err(error) => {
                    self.emit_diagnostic(Diagnostic::bug().with_message(error.to_string()));
                    return None;
                }
            };
            debug!(file = file.name().as_str(), "reading schema");

            let document = match xml::read_document(file_id, file.source()) {
                Ok(document) => document,
                Err(error) => {
                    self.emit_diagnostic(error.to_diagnostic());
                    return None;
                }
            };
            if let Err(error) = schema.load(&document, self.notations) {
                self.emit_diagnostic(error.to_diagnostic());
                return None;
            }
        }

        Some(schema)
    }

    fn emit_doc(&self, doc: ::pretty::RefDoc) {
        let mut emit_writer = self.emit_writer.borrow_mut();
        let result = writeln!(emit_writer, "{}", doc.pretty(self.emit_width))
            .and_then(|()| emit_writer.flush());
        if let Err(error) = result {
            warn!(%error, "failed to write schema");
            *self.seen_errors.borrow_mut() = true;
        }
    }

    fn emit_diagnostic(&self, diagnostic: Diagnostic<FileId>) {
        let mut writer = self.diagnostic_writer.borrow_mut();
        let config = &self.codespan_config;

        let result = codespan_reporting::term::emit(&mut *writer, config, &self.files, &diagnostic);
        if let Err(error) = result {
            warn!(%error, "failed to render diagnostic");
        }
        if let Err(error) = writer.flush() {
            warn!(%error, "failed to flush diagnostics");
        }

        if diagnostic.severity >= Severity::Error {
            *self.seen_errors.borrow_mut() = true;
        }
    }

    fn emit_read_diagnostic(&self, name: impl std::fmt::Display, error: std::io::Error) {
        let diagnostic =
            Diagnostic::error().with_message(format!("couldn't read `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }
}

impl Default for Driver {
    fn default() -> Driver {
        Driver::new()
    }
}

fn color_choice(stream: atty::Stream) -> ColorChoice {
    if atty::is(stream) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}
