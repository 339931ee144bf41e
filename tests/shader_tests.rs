// SPDX-License-Identifier: GPL-3.0-only

//! WGSL validation for every render pass

use video_filters::shaders::{
    BLEND_FRAGMENT, BLUR_FRAGMENT, FRAGMENTS, MASK_REFINE_FRAGMENT, MASKED_BLUR_FRAGMENT,
    PASSTHROUGH_FRAGMENT, STATE_UPDATE_FRAGMENT, module_source,
};

/// Parse and validate a shader using naga
fn validate_shader(name: &str, source: &str) -> naga::Module {
    let module = match naga::front::wgsl::parse_str(source) {
        Ok(module) => module,
        Err(e) => panic!("Shader '{}' parse failed: {:?}", name, e),
    };

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module);

    if let Err(e) = info {
        panic!("Shader '{}' validation failed: {:?}", name, e);
    }
    module
}

fn entry_points(module: &naga::Module) -> Vec<String> {
    module
        .entry_points
        .iter()
        .map(|entry| entry.name.clone())
        .collect()
}

#[test]
fn test_all_fragments_validate() {
    for (name, fragment) in FRAGMENTS {
        validate_shader(name, &module_source(fragment));
    }
}

#[test]
fn test_passthrough_shader_validates() {
    validate_shader("passthrough", &module_source(PASSTHROUGH_FRAGMENT));
}

#[test]
fn test_blur_shader_validates() {
    validate_shader("blur", &module_source(BLUR_FRAGMENT));
}

#[test]
fn test_state_update_shader_validates() {
    validate_shader("state_update", &module_source(STATE_UPDATE_FRAGMENT));
}

#[test]
fn test_mask_refine_shader_validates() {
    validate_shader("mask_refine", &module_source(MASK_REFINE_FRAGMENT));
}

#[test]
fn test_masked_blur_shader_validates() {
    validate_shader("masked_blur", &module_source(MASKED_BLUR_FRAGMENT));
}

#[test]
fn test_blend_shader_validates() {
    validate_shader("blend", &module_source(BLEND_FRAGMENT));
}

#[test]
fn test_modules_expose_both_vertex_entry_points() {
    for (name, fragment) in FRAGMENTS {
        let module = validate_shader(name, &module_source(fragment));
        let entries = entry_points(&module);
        assert!(entries.iter().any(|e| e == "vs_offscreen"), "{}: {:?}", name, entries);
        assert!(entries.iter().any(|e| e == "vs_canvas"), "{}: {:?}", name, entries);
        assert!(entries.iter().any(|e| e == "fs_main"), "{}: {:?}", name, entries);
    }
}
