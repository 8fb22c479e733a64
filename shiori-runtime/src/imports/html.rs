//! The `html` import namespace: CSS selection and traversal over parsed
//! documents
//!
//! Descriptors refer either to a document (owning the node arena) or to a
//! node set inside one. Node descriptors pin their document through the
//! resource table's refcount, so a document outlives every selection made
//! from it.

use crate::abi::HtmlError;
use crate::host::HostState;
use crate::html::HtmlDocument;
use crate::imports::{read_opt_string, read_string};
use crate::value::{NodeRef, Value};
use anyhow::Result;
use ego_tree::NodeId;
use wasmtime::{Caller, Linker};

fn scope_of(state: &HostState, rid: i32) -> Result<(i32, Vec<NodeId>), HtmlError> {
    match state.table.value(rid) {
        Some(Value::Document(document)) => Ok((rid, document.root_nodes())),
        Some(Value::Node(node)) => Ok((node.doc, node.nodes.clone())),
        _ => Err(HtmlError::InvalidDescriptor),
    }
}

fn document(state: &HostState, doc_rid: i32) -> Result<&HtmlDocument, HtmlError> {
    match state.table.value(doc_rid) {
        Some(Value::Document(document)) => Ok(document),
        _ => Err(HtmlError::InvalidDescriptor),
    }
}

fn document_mut(state: &mut HostState, doc_rid: i32) -> Result<&mut HtmlDocument, HtmlError> {
    match state.table.value_mut(doc_rid) {
        Some(Value::Document(document)) => Ok(document),
        _ => Err(HtmlError::InvalidDescriptor),
    }
}

// allocate_value retains the owning document for the embedded node ref.
fn alloc_nodes(state: &mut HostState, doc_rid: i32, nodes: Vec<NodeId>) -> i32 {
    state
        .table
        .allocate_value(Value::Node(NodeRef { doc: doc_rid, nodes }))
}

fn alloc_string(state: &mut HostState, text: String) -> i32 {
    state.table.allocate_value(Value::String(text))
}

/// Register a read-only operation that maps a node scope to a string rid.
fn register_text_op(
    linker: &mut Linker<HostState>,
    name: &str,
    read: fn(&HtmlDocument, &[NodeId]) -> String,
) -> Result<()> {
    linker.func_wrap(
        "html",
        name,
        move |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let text = match document(state, doc_rid) {
                Ok(document) => read(document, &nodes),
                Err(err) => return err.code(),
            };
            alloc_string(state, text)
        },
    )?;
    Ok(())
}

/// Register a traversal operation that maps a node scope to a new node set.
fn register_traverse_op(
    linker: &mut Linker<HostState>,
    name: &str,
    traverse: fn(&HtmlDocument, &[NodeId]) -> Vec<NodeId>,
) -> Result<()> {
    linker.func_wrap(
        "html",
        name,
        move |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let found = match document(state, doc_rid) {
                Ok(document) => traverse(document, &nodes),
                Err(err) => return err.code(),
            };
            alloc_nodes(state, doc_rid, found)
        },
    )?;
    Ok(())
}

/// Register a mutation operation taking an HTML/text argument.
fn register_mutate_op(
    linker: &mut Linker<HostState>,
    name: &str,
    mutate: fn(&mut HtmlDocument, &[NodeId], &str),
) -> Result<()> {
    linker.func_wrap(
        "html",
        name,
        move |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(content) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            match document_mut(state, doc_rid) {
                Ok(document) => {
                    mutate(document, &nodes, &content);
                    0
                }
                Err(err) => err.code(),
            }
        },
    )?;
    Ok(())
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "html",
        "parse",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, base_ptr: i32, base_len: i32| -> i32 {
            let Some(text) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let base = read_opt_string(&mut caller, base_ptr, base_len);
            let document = HtmlDocument::parse(&text, base.as_deref());
            caller
                .data_mut()
                .table
                .allocate_value(Value::Document(Box::new(document)))
        },
    )?;

    linker.func_wrap(
        "html",
        "parse_fragment",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, base_ptr: i32, base_len: i32| -> i32 {
            let Some(text) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let base = read_opt_string(&mut caller, base_ptr, base_len);
            let document = HtmlDocument::parse_fragment(&text, base.as_deref());
            caller
                .data_mut()
                .table
                .allocate_value(Value::Document(Box::new(document)))
        },
    )?;

    linker.func_wrap(
        "html",
        "select",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(selector) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let found = match document(state, doc_rid).and_then(|d| d.select(&nodes, &selector)) {
                Ok(found) => found,
                Err(err) => return err.code(),
            };
            alloc_nodes(state, doc_rid, found)
        },
    )?;

    linker.func_wrap(
        "html",
        "select_first",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(selector) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let found = match document(state, doc_rid).and_then(|d| d.select(&nodes, &selector)) {
                Ok(found) => found,
                Err(err) => return err.code(),
            };
            match found.first() {
                Some(&first) => alloc_nodes(state, doc_rid, vec![first]),
                None => HtmlError::NoResult.code(),
            }
        },
    )?;

    linker.func_wrap(
        "html",
        "attr",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(name) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let value = match document(state, doc_rid) {
                Ok(document) => document.attr(&nodes, &name).unwrap_or_default(),
                Err(err) => return err.code(),
            };
            alloc_string(state, value)
        },
    )?;

    register_text_op(linker, "text", HtmlDocument::text)?;
    register_text_op(linker, "untrimmed_text", HtmlDocument::untrimmed_text)?;
    register_text_op(linker, "own_text", HtmlDocument::own_text)?;
    register_text_op(linker, "html", HtmlDocument::inner_html)?;
    register_text_op(linker, "outer_html", HtmlDocument::outer_html)?;
    register_text_op(linker, "data", HtmlDocument::data)?;

    register_mutate_op(linker, "set_text", HtmlDocument::set_text)?;
    register_mutate_op(linker, "set_html", HtmlDocument::set_html)?;
    register_mutate_op(linker, "prepend", HtmlDocument::prepend)?;
    register_mutate_op(linker, "append", HtmlDocument::append)?;

    register_traverse_op(linker, "parent", HtmlDocument::parent)?;
    register_traverse_op(linker, "children", HtmlDocument::children)?;
    register_traverse_op(linker, "siblings", HtmlDocument::siblings)?;
    register_traverse_op(linker, "next", HtmlDocument::next_sibling)?;
    register_traverse_op(linker, "previous", HtmlDocument::prev_sibling)?;

    linker.func_wrap(
        "html",
        "tag_name",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            identity_string(caller.data_mut(), rid, HtmlDocument::tag_name)
        },
    )?;

    linker.func_wrap(
        "html",
        "class_name",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            identity_string(caller.data_mut(), rid, HtmlDocument::class_name)
        },
    )?;

    linker.func_wrap(
        "html",
        "id",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            identity_string(caller.data_mut(), rid, HtmlDocument::id_attr)
        },
    )?;

    linker.func_wrap(
        "html",
        "has_class",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(class) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            match document(state, doc_rid) {
                Ok(document) => document.has_class(&nodes, &class) as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "html",
        "has_attr",
        |mut caller: Caller<'_, HostState>, rid: i32, ptr: i32, len: i32| -> i32 {
            let Some(name) = read_string(&mut caller, ptr, len) else {
                return HtmlError::InvalidString.code();
            };
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            match document(state, doc_rid) {
                Ok(document) => document.has_attr(&nodes, &name) as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    // Node-set accessors.

    linker.func_wrap(
        "html",
        "first",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            pick(caller.data_mut(), rid, |nodes| nodes.first().copied())
        },
    )?;

    linker.func_wrap(
        "html",
        "last",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            pick(caller.data_mut(), rid, |nodes| nodes.last().copied())
        },
    )?;

    linker.func_wrap(
        "html",
        "get",
        |mut caller: Caller<'_, HostState>, rid: i32, index: i32| -> i32 {
            pick(caller.data_mut(), rid, move |nodes| {
                nodes.get(index.max(0) as usize).copied()
            })
        },
    )?;

    linker.func_wrap(
        "html",
        "size",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match caller.data().table.value(rid) {
                Some(Value::Node(node)) => node.nodes.len() as i32,
                Some(Value::Document(_)) => 1,
                _ => HtmlError::InvalidDescriptor.code(),
            }
        },
    )?;

    // Legacy: explode a node set into an array of single-node descriptors.
    linker.func_wrap(
        "html",
        "array",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let (doc_rid, nodes) = match scope_of(state, rid) {
                Ok(scope) => scope,
                Err(err) => return err.code(),
            };
            let members: Vec<Value> = nodes
                .iter()
                .map(|&id| {
                    Value::Node(NodeRef {
                        doc: doc_rid,
                        nodes: vec![id],
                    })
                })
                .collect();
            state.table.allocate_value(Value::Array(members))
        },
    )?;

    Ok(())
}

fn identity_string(
    state: &mut HostState,
    rid: i32,
    read: fn(&HtmlDocument, &[NodeId]) -> Option<String>,
) -> i32 {
    let (doc_rid, nodes) = match scope_of(state, rid) {
        Ok(scope) => scope,
        Err(err) => return err.code(),
    };
    let text = match document(state, doc_rid) {
        Ok(document) => match read(document, &nodes) {
            Some(text) => text,
            None => return HtmlError::NoResult.code(),
        },
        Err(err) => return err.code(),
    };
    alloc_string(state, text)
}

fn pick(state: &mut HostState, rid: i32, choose: impl Fn(&[NodeId]) -> Option<NodeId>) -> i32 {
    let (doc_rid, nodes) = match scope_of(state, rid) {
        Ok(scope) => scope,
        Err(err) => return err.code(),
    };
    match choose(&nodes) {
        Some(node) => alloc_nodes(state, doc_rid, vec![node]),
        None => HtmlError::NoResult.code(),
    }
}
