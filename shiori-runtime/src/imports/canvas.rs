//! The `canvas` import namespace: software 2D contexts, images, fonts

use crate::abi::CanvasError;
use crate::canvas::{CanvasContext, CanvasFont, CanvasImage, Color, PathOp, Rect, StrokeStyle};
use crate::codec;
use crate::host::HostState;
use crate::imports::{read_bytes, read_string};
use crate::table::Resource;
use crate::value::Value;
use anyhow::Result;
use wasmtime::{Caller, Linker};

fn context_mut(state: &mut HostState, rid: i32) -> Result<&mut CanvasContext, CanvasError> {
    match state.table.get_mut(rid) {
        Some(Resource::Canvas(context)) => Ok(context),
        _ => Err(CanvasError::InvalidContext),
    }
}

fn image(state: &HostState, rid: i32) -> Result<&CanvasImage, CanvasError> {
    match state.table.get(rid) {
        Some(Resource::Image(image)) => Ok(image),
        _ => Err(CanvasError::InvalidImage),
    }
}

fn decode_path(bytes: &[u8]) -> Result<Vec<PathOp>, CanvasError> {
    codec::decode::<Vec<PathOp>>(bytes, "canvas path").ok_or(CanvasError::InvalidPath)
}

pub fn register(linker: &mut Linker<HostState>) -> Result<()> {
    linker.func_wrap(
        "canvas",
        "new_context",
        |mut caller: Caller<'_, HostState>, width: f32, height: f32| -> i32 {
            match CanvasContext::new(width, height) {
                Ok(context) => caller.data_mut().table.allocate(Resource::Canvas(context)),
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "set_transform",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         a: f32,
         b: f32,
         c: f32,
         d: f32,
         tx: f32,
         ty: f32|
         -> i32 {
            match context_mut(caller.data_mut(), rid) {
                Ok(context) => {
                    context.set_transform([a, b, c, d, tx, ty]);
                    0
                }
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "draw_image",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         image_rid: i32,
         dx: f32,
         dy: f32,
         dw: f32,
         dh: f32|
         -> i32 {
            let state = caller.data_mut();
            let source = match image(state, image_rid) {
                Ok(source) => source.clone(),
                Err(err) => return err.code(),
            };
            let dest = Rect {
                x: dx,
                y: dy,
                width: dw,
                height: dh,
            };
            match context_mut(state, rid).and_then(|c| c.draw_image(&source, dest)) {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "copy_image",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         image_rid: i32,
         sx: f32,
         sy: f32,
         sw: f32,
         sh: f32,
         dx: f32,
         dy: f32,
         dw: f32,
         dh: f32|
         -> i32 {
            let state = caller.data_mut();
            let source = match image(state, image_rid) {
                Ok(source) => source.clone(),
                Err(err) => return err.code(),
            };
            let src = Rect {
                x: sx,
                y: sy,
                width: sw,
                height: sh,
            };
            let dest = Rect {
                x: dx,
                y: dy,
                width: dw,
                height: dh,
            };
            match context_mut(state, rid).and_then(|c| c.copy_image(&source, src, dest)) {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "fill",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         path_ptr: i32,
         path_len: i32,
         red: f32,
         green: f32,
         blue: f32,
         alpha: f32|
         -> i32 {
            let Some(bytes) = read_bytes(&mut caller, path_ptr, path_len) else {
                return CanvasError::InvalidPath.code();
            };
            let path = match decode_path(&bytes) {
                Ok(path) => path,
                Err(err) => return err.code(),
            };
            let color = Color {
                red,
                green,
                blue,
                alpha,
            };
            match context_mut(caller.data_mut(), rid).and_then(|c| c.fill(&path, color)) {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "stroke",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         path_ptr: i32,
         path_len: i32,
         style_ptr: i32,
         style_len: i32|
         -> i32 {
            let Some(path_bytes) = read_bytes(&mut caller, path_ptr, path_len) else {
                return CanvasError::InvalidPath.code();
            };
            let Some(style_bytes) = read_bytes(&mut caller, style_ptr, style_len) else {
                return CanvasError::InvalidStyle.code();
            };
            let path = match decode_path(&path_bytes) {
                Ok(path) => path,
                Err(err) => return err.code(),
            };
            let Some(style) = codec::decode::<StrokeStyle>(&style_bytes, "stroke style") else {
                return CanvasError::InvalidStyle.code();
            };
            match context_mut(caller.data_mut(), rid).and_then(|c| c.stroke(&path, &style)) {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "draw_text",
        |mut caller: Caller<'_, HostState>,
         rid: i32,
         text_ptr: i32,
         text_len: i32,
         size: f32,
         x: f32,
         y: f32,
         font_rid: i32,
         red: f32,
         green: f32,
         blue: f32,
         alpha: f32|
         -> i32 {
            let Some(text) = read_string(&mut caller, text_ptr, text_len) else {
                return CanvasError::InvalidString.code();
            };
            let state = caller.data_mut();
            let font = match state.table.get(font_rid) {
                Some(Resource::Font(font)) => font.clone(),
                _ => return CanvasError::InvalidFont.code(),
            };
            let color = Color {
                red,
                green,
                blue,
                alpha,
            };
            match context_mut(state, rid).and_then(|c| c.draw_text(&text, &font, size, x, y, color))
            {
                Ok(()) => 0,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "get_image",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let snapshot = match context_mut(state, rid) {
                Ok(context) => context.get_image(),
                Err(err) => return err.code(),
            };
            state.table.allocate(Resource::Image(snapshot))
        },
    )?;

    // Fonts.

    linker.func_wrap(
        "canvas",
        "new_font",
        |mut caller: Caller<'_, HostState>, name_ptr: i32, name_len: i32, _size: f32| -> i32 {
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return CanvasError::InvalidString.code();
            };
            match CanvasFont::system(&name) {
                Ok(font) => caller.data_mut().table.allocate(Resource::Font(font)),
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "system_font",
        |mut caller: Caller<'_, HostState>, name_ptr: i32, name_len: i32, _size: f32| -> i32 {
            let Some(name) = read_string(&mut caller, name_ptr, name_len) else {
                return CanvasError::InvalidString.code();
            };
            match CanvasFont::system(&name) {
                Ok(font) => caller.data_mut().table.allocate(Resource::Font(font)),
                Err(err) => err.code(),
            }
        },
    )?;

    // Load a font from a stored byte payload (e.g. a response body).
    linker.func_wrap(
        "canvas",
        "load_font",
        |mut caller: Caller<'_, HostState>, data_rid: i32| -> i32 {
            let state = caller.data_mut();
            let bytes = match state.table.get(data_rid) {
                Some(Resource::Value(Value::Bytes(bytes))) => bytes.clone(),
                Some(Resource::Request(request)) => match request.response.as_ref() {
                    Some(response) => response.body.clone(),
                    None => return CanvasError::FontLoadFailed.code(),
                },
                _ => return CanvasError::FontLoadFailed.code(),
            };
            match CanvasFont::from_bytes(bytes) {
                Ok(font) => state.table.allocate(Resource::Font(font)),
                Err(err) => err.code(),
            }
        },
    )?;

    // Images.

    linker.func_wrap(
        "canvas",
        "new_image",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> i32 {
            let Some(bytes) = read_bytes(&mut caller, ptr, len) else {
                return CanvasError::InvalidImagePointer.code();
            };
            match CanvasImage::decode(&bytes) {
                Ok(image) => caller.data_mut().table.allocate(Resource::Image(image)),
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "get_image_width",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match image(caller.data(), rid) {
                Ok(image) => image.width() as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    linker.func_wrap(
        "canvas",
        "get_image_height",
        |caller: Caller<'_, HostState>, rid: i32| -> i32 {
            match image(caller.data(), rid) {
                Ok(image) => image.height() as i32,
                Err(err) => err.code(),
            }
        },
    )?;

    // A freshly encoded PNG of the image contents, as a byte value.
    linker.func_wrap(
        "canvas",
        "get_image_data",
        |mut caller: Caller<'_, HostState>, rid: i32| -> i32 {
            let state = caller.data_mut();
            let png = match image(state, rid).and_then(|i| i.png_bytes()) {
                Ok(png) => png,
                Err(err) => return err.code(),
            };
            state.table.allocate_value(Value::Bytes(png))
        },
    )?;

    Ok(())
}
