//! Pipeline facade over the compile, link, bind and diff phases, plus the
//! extension contract tools register against.

mod extension;
mod pipeline;

pub use extension::{DecompilerExtension, Extension, ExtensionSet};
pub use pipeline::{
    bind_output, build_library, build_package, compile_files, compile_localizations,
    compile_sources_from_xml_map, compile_with_resolver, create_patch_transform, create_transform, guarded,
    link_output, load_inputs, ApiError, LoadedInputs, PackageOptions,
};
