//! Column indices of the built-in tables, in `data/tables.xml` order.

pub mod summary_information {
    pub const PROPERTY_ID: usize = 0;
    pub const VALUE: usize = 1;

    pub const CODEPAGE: i32 = 1;
    pub const TITLE: i32 = 2;
    pub const SUBJECT: i32 = 3;
    pub const AUTHOR: i32 = 4;
    pub const TEMPLATE: i32 = 7;
    pub const REVISION: i32 = 9;
    pub const PAGE_COUNT: i32 = 14;
    pub const WORD_COUNT: i32 = 15;
    /// Holds transform validation and error flags.
    pub const CHAR_COUNT: i32 = 16;
}

pub mod property {
    pub const PROPERTY: usize = 0;
    pub const VALUE: usize = 1;
}

pub mod directory {
    pub const DIRECTORY: usize = 0;
    pub const PARENT: usize = 1;
    pub const DEFAULT_DIR: usize = 2;
}

pub mod component {
    pub const COMPONENT: usize = 0;
    pub const COMPONENT_ID: usize = 1;
    pub const DIRECTORY: usize = 2;
    pub const ATTRIBUTES: usize = 3;
    pub const CONDITION: usize = 4;
    pub const KEY_PATH: usize = 5;

    pub const ATTRIBUTE_REGISTRY_KEY_PATH: i32 = 0x4;
}

pub mod file {
    pub const FILE: usize = 0;
    pub const COMPONENT: usize = 1;
    pub const FILE_NAME: usize = 2;
    pub const FILE_SIZE: usize = 3;
    pub const VERSION: usize = 4;
    pub const LANGUAGE: usize = 5;
    pub const ATTRIBUTES: usize = 6;
    pub const SEQUENCE: usize = 7;

    pub const ATTRIBUTE_NONCOMPRESSED: i32 = 0x2000;
    pub const ATTRIBUTE_COMPRESSED: i32 = 0x4000;
}

pub mod wix_file {
    pub const FILE: usize = 0;
    pub const DIRECTORY: usize = 1;
    pub const DISK_ID: usize = 2;
    pub const SOURCE: usize = 3;
    pub const COMPRESSED: usize = 4;
}

pub mod feature {
    pub const FEATURE: usize = 0;
    pub const PARENT: usize = 1;
    pub const TITLE: usize = 2;
    pub const DESCRIPTION: usize = 3;
    pub const DISPLAY: usize = 4;
    pub const LEVEL: usize = 5;
    pub const DIRECTORY: usize = 6;
    pub const ATTRIBUTES: usize = 7;
}

pub mod feature_components {
    pub const FEATURE: usize = 0;
    pub const COMPONENT: usize = 1;
}

pub mod component_group {
    pub const ID: usize = 0;
}

pub mod module_signature {
    pub const MODULE_ID: usize = 0;
    pub const LANGUAGE: usize = 1;
    pub const VERSION: usize = 2;
}

pub mod module_components {
    pub const COMPONENT: usize = 0;
    pub const MODULE_ID: usize = 1;
    pub const LANGUAGE: usize = 2;
}

pub mod media {
    pub const DISK_ID: usize = 0;
    pub const LAST_SEQUENCE: usize = 1;
    pub const DISK_PROMPT: usize = 2;
    pub const CABINET: usize = 3;
    pub const VOLUME_LABEL: usize = 4;
    pub const SOURCE: usize = 5;
}

pub mod binary {
    pub const NAME: usize = 0;
    pub const DATA: usize = 1;
}

pub mod custom_action {
    pub const ACTION: usize = 0;
    pub const TYPE: usize = 1;
    pub const SOURCE: usize = 2;
    pub const TARGET: usize = 3;
}

pub mod registry {
    pub const REGISTRY: usize = 0;
    pub const ROOT: usize = 1;
    pub const KEY: usize = 2;
    pub const NAME: usize = 3;
    pub const VALUE: usize = 4;
    pub const COMPONENT: usize = 5;
}

pub mod wix_variable {
    pub const ID: usize = 0;
    pub const VALUE: usize = 1;
    pub const OVERRIDABLE: usize = 2;
}

#[cfg(test)]
mod columns_tests {
    use crate::definitions::TableDefinitions;

    #[test]
    fn indices_match_builtin_definitions() {
        let definitions = TableDefinitions::builtin();
        let check = |table: &str, column: &str, index: usize| {
            let definition = definitions.get(table).expect("builtin table");
            assert_eq!(
                definition.column_index(column),
                Some(index),
                "{}.{}",
                table,
                column
            );
        };

        check("File", "Component_", super::file::COMPONENT);
        check("File", "FileSize", super::file::FILE_SIZE);
        check("File", "Sequence", super::file::SEQUENCE);
        check("WixFile", "DiskId", super::wix_file::DISK_ID);
        check("WixFile", "Source", super::wix_file::SOURCE);
        check("Directory", "Directory_Parent", super::directory::PARENT);
        check("Component", "Directory_", super::component::DIRECTORY);
        check("Media", "Cabinet", super::media::CABINET);
        check("Media", "LastSequence", super::media::LAST_SEQUENCE);
        check("FeatureComponents", "Component_", super::feature_components::COMPONENT);
        check("ModuleComponents", "ModuleID", super::module_components::MODULE_ID);
        check("Registry", "Component_", super::registry::COMPONENT);
        check("WixVariable", "Overridable", super::wix_variable::OVERRIDABLE);
    }
}
