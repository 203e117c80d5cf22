// n2c — N2A C backend
//
// Library root. Front end (document, lexer, parser, expr), model tree and
// analysis (model, attr, resolve, analyze, exponent), planning (plan,
// events), C++ synthesis (cpp, render, equations, codegen, emit_*), and the
// job driver (pass, pipeline, job, toolchain, runtime_cache).

pub mod analyze;
pub mod attr;
pub mod codegen;
pub mod cpp;
pub mod diag;
pub mod document;
pub mod emit_connect;
pub mod emit_event;
pub mod emit_instance;
pub mod emit_population;
pub mod equations;
pub mod error;
pub mod events;
pub mod exponent;
pub mod expr;
pub mod id;
pub mod job;
pub mod lexer;
pub mod model;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod plan;
pub mod render;
pub mod resolve;
pub mod runtime_cache;
pub mod toolchain;
