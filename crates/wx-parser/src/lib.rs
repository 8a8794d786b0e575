mod condition;
mod preprocessor;
mod variables;
mod xml;

pub use condition::evaluate_condition;
pub use preprocessor::{
    normalize_virtual_path, preprocess, preprocess_xml_map, FileSystemResolver, PreprocessOptions,
    SourceResolver,
};
pub use variables::Variables;
pub use xml::{ExtensionAttribute, SourceDocument, XmlElementNode, XmlNode, XmlTextNode};
