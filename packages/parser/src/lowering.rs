use crate::ast::{Block, Expr, SourceMap, SourceRange, TemplatePart};
use crate::error::ParseError;
use nacl_model::{
    Element, ElemID, Field, InstanceElement, ObjectType, PrimitiveKind, PrimitiveType,
    ReferenceExpression, StaticFile, TypeRef, Value, Variable,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name given to the single instance of a settings type
pub const CONFIG_INSTANCE_NAME: &str = "_config";

/// Everything the frontend produces for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub elements: Vec<Element>,
    pub errors: Vec<ParseError>,
    pub source_map: SourceMap,
    /// Element IDs mentioned by reference expressions anywhere in the file
    pub referenced: BTreeSet<ElemID>,
}

impl ParseResult {
    pub fn empty() -> Self {
        Self {
            elements: Vec::new(),
            errors: Vec::new(),
            source_map: SourceMap::new(),
            referenced: BTreeSet::new(),
        }
    }
}

/// Lower a parsed block tree into elements
pub fn lower(blocks: Vec<Block>, parse_errors: Vec<ParseError>) -> ParseResult {
    let mut lowerer = Lowerer {
        elements: Vec::new(),
        errors: parse_errors,
        source_map: SourceMap::new(),
        referenced: BTreeSet::new(),
    };
    for block in blocks {
        lowerer.lower_top_level(block);
    }
    ParseResult {
        elements: lowerer.elements,
        errors: lowerer.errors,
        source_map: lowerer.source_map,
        referenced: lowerer.referenced,
    }
}

struct Lowerer {
    elements: Vec<Element>,
    errors: Vec<ParseError>,
    source_map: SourceMap,
    referenced: BTreeSet<ElemID>,
}

impl Lowerer {
    fn lower_top_level(&mut self, block: Block) {
        match block.block_type.as_str() {
            "type" => match block.labels.as_slice() {
                [_name] => self.lower_object_type(block, false),
                [_name, is_word, _kind] if is_word == "is" => self.lower_primitive_type(block),
                _ => self.errors.push(ParseError::at(
                    "Expected 'type <adapter>.<name>' or 'type <adapter>.<name> is <kind>'",
                    block.range,
                )),
            },
            "settings" => match block.labels.as_slice() {
                [_name] => self.lower_object_type(block, true),
                _ => self.errors.push(ParseError::at(
                    "Expected 'settings <adapter>.<name>'",
                    block.range,
                )),
            },
            "vars" => {
                if !block.labels.is_empty() {
                    self.errors
                        .push(ParseError::at("'vars' blocks take no labels", block.range));
                    return;
                }
                self.lower_vars(block);
            }
            _ => self.lower_instance(block),
        }
    }

    fn lower_object_type(&mut self, block: Block, is_settings: bool) {
        let Some(elem_id) = self.type_id(&block.labels[0], &block.type_range) else {
            return;
        };
        let mut object = ObjectType::new(elem_id.clone());
        object.is_settings = is_settings;

        for attr in &block.attrs {
            let anno_id = elem_id
                .create_nested_id(&["attr", &attr.key])
                .expect("type-level ID");
            self.source_map
                .push(anno_id.get_full_name(), attr.range.clone());
            let value = self.lower_expr(&attr.value);
            object.annotations.insert(attr.key.clone(), value);
        }

        for inner in &block.blocks {
            if inner.block_type == "annotations" {
                self.lower_annotation_types(&elem_id, inner, &mut object.annotation_types);
            } else {
                self.lower_field(&elem_id, inner, &mut object);
            }
        }

        self.source_map.push(elem_id.get_full_name(), block.range);
        self.elements.push(Element::Object(object));
    }

    fn lower_primitive_type(&mut self, block: Block) {
        let Some(elem_id) = self.type_id(&block.labels[0], &block.type_range) else {
            return;
        };
        let kind_word = &block.labels[2];
        let Some(kind) = PrimitiveKind::from_name(kind_word) else {
            self.errors.push(ParseError::at(
                format!("Unknown primitive kind: {}", kind_word),
                block.range,
            ));
            return;
        };

        let mut primitive = PrimitiveType::new(elem_id.clone(), kind);
        for attr in &block.attrs {
            let anno_id = elem_id
                .create_nested_id(&["attr", &attr.key])
                .expect("type-level ID");
            self.source_map
                .push(anno_id.get_full_name(), attr.range.clone());
            let value = self.lower_expr(&attr.value);
            primitive.annotations.insert(attr.key.clone(), value);
        }
        for inner in &block.blocks {
            if inner.block_type == "annotations" {
                self.lower_annotation_types(&elem_id, inner, &mut primitive.annotation_types);
            } else {
                self.errors.push(ParseError::at(
                    "Primitive types cannot declare fields",
                    inner.range.clone(),
                ));
            }
        }

        self.source_map.push(elem_id.get_full_name(), block.range);
        self.elements.push(Element::Primitive(primitive));
    }

    fn lower_annotation_types(
        &mut self,
        owner: &ElemID,
        block: &Block,
        annotation_types: &mut BTreeMap<String, TypeRef>,
    ) {
        for decl in &block.blocks {
            let Some(name) = decl.labels.first() else {
                self.errors.push(ParseError::at(
                    "Annotation declarations need a name",
                    decl.range.clone(),
                ));
                continue;
            };
            let type_ref = self.parse_type_ref(&decl.block_type, &decl.type_range);
            let anno_id = owner
                .create_nested_id(&["annotation", name])
                .expect("type-level ID");
            self.source_map
                .push(anno_id.get_full_name(), decl.range.clone());
            annotation_types.insert(name.clone(), type_ref);
        }
        for attr in &block.attrs {
            self.errors.push(ParseError::at(
                "'annotations' blocks only contain type declarations",
                attr.range.clone(),
            ));
        }
    }

    fn lower_field(&mut self, parent: &ElemID, block: &Block, object: &mut ObjectType) {
        let Some(name) = block.labels.first() else {
            self.errors.push(ParseError::new(
                "Field declarations need a name",
                block.range.clone(),
                block.type_range.clone(),
            ));
            return;
        };
        if object.fields.contains_key(name) {
            self.errors.push(ParseError::new(
                format!("Field redefined: {}", name),
                block.range.clone(),
                block.type_range.clone(),
            ));
            return;
        }

        let type_ref = self.parse_type_ref(&block.block_type, &block.type_range);
        let mut field = Field::new(parent.clone(), name.clone(), type_ref);
        let field_id = field.elem_id();

        for attr in &block.attrs {
            let anno_id = field_id
                .create_nested_id(&[&attr.key])
                .expect("field IDs nest freely");
            self.source_map
                .push(anno_id.get_full_name(), attr.range.clone());
            let value = self.lower_expr(&attr.value);
            field.annotations.insert(attr.key.clone(), value);
        }
        for inner in &block.blocks {
            self.errors.push(ParseError::at(
                "Fields cannot contain nested blocks",
                inner.range.clone(),
            ));
        }

        self.source_map
            .push(field_id.get_full_name(), block.range.clone());
        object.fields.insert(name.clone(), field);
    }

    fn lower_instance(&mut self, block: Block) {
        let Some(type_id) = self.type_id(&block.block_type, &block.type_range) else {
            return;
        };
        // an instance depends on its type; index it for reverse lookups
        self.referenced.insert(type_id.clone());
        let name = match block.labels.as_slice() {
            [] => CONFIG_INSTANCE_NAME.to_string(),
            [name] => name.clone(),
            _ => {
                self.errors.push(ParseError::at(
                    "Instance blocks take at most one label",
                    block.range,
                ));
                return;
            }
        };
        let elem_id = type_id
            .create_nested_id(&["instance", &name])
            .expect("type-level ID");
        let mut instance = InstanceElement::new(elem_id.clone(), TypeRef::Named(type_id));

        for attr in &block.attrs {
            let entry_id = elem_id
                .create_nested_id(&[&attr.key])
                .expect("instance IDs nest freely");
            self.source_map
                .push(entry_id.get_full_name(), attr.range.clone());
            let value = self.lower_expr(&attr.value);
            if attr.key.starts_with('_') {
                instance.annotations.insert(attr.key.clone(), value);
            } else {
                instance.value.insert(attr.key.clone(), value);
            }
        }

        // inner blocks contribute nested map values under the block type name
        for inner in &block.blocks {
            let value = self.lower_block_value(&elem_id, inner);
            instance.value.insert(inner.block_type.clone(), value);
        }

        self.source_map.push(elem_id.get_full_name(), block.range);
        self.elements.push(Element::Instance(instance));
    }

    fn lower_block_value(&mut self, parent_id: &ElemID, block: &Block) -> Value {
        let mut entries = BTreeMap::new();
        let block_id = parent_id
            .create_nested_id(&[&block.block_type])
            .unwrap_or_else(|_| parent_id.clone());
        for attr in &block.attrs {
            if let Ok(entry_id) = block_id.create_nested_id(&[&attr.key]) {
                self.source_map
                    .push(entry_id.get_full_name(), attr.range.clone());
            }
            entries.insert(attr.key.clone(), self.lower_expr(&attr.value));
        }
        for inner in &block.blocks {
            let value = self.lower_block_value(&block_id, inner);
            entries.insert(inner.block_type.clone(), value);
        }
        Value::Map(entries)
    }

    fn lower_vars(&mut self, block: Block) {
        for attr in &block.attrs {
            let elem_id = ElemID::variable(&attr.key);
            self.source_map
                .push(elem_id.get_full_name(), attr.range.clone());
            let value = self.lower_expr(&attr.value);
            self.elements.push(Element::Variable(Variable {
                elem_id,
                value,
                path: None,
            }));
        }
        for inner in &block.blocks {
            self.errors.push(ParseError::at(
                "'vars' blocks cannot contain nested blocks",
                inner.range.clone(),
            ));
        }
    }

    // --- expressions ---

    fn lower_expr(&mut self, expr: &Expr) -> Value {
        match expr {
            Expr::Str { parts, range } => self.lower_template(parts, range),
            Expr::Multiline { value, .. } => Value::String(value.clone()),
            Expr::Number { value, .. } => Value::Number(*value),
            Expr::Bool { value, .. } => Value::Bool(*value),
            Expr::List { items, .. } => {
                Value::List(items.iter().map(|item| self.lower_expr(item)).collect())
            }
            Expr::Object { attrs, .. } => Value::Map(
                attrs
                    .iter()
                    .map(|attr| (attr.key.clone(), self.lower_expr(&attr.value)))
                    .collect(),
            ),
            Expr::Reference { path, range } => match self.parse_ref(path, range) {
                Some(elem_id) => Value::Reference(ReferenceExpression::new(elem_id)),
                None => Value::String(path.clone()),
            },
            Expr::Call { name, args, range } => self.lower_call(name, args, range),
            Expr::Dynamic { .. } => Value::Dynamic,
        }
    }

    /// A template that is exactly one reference lowers to the reference
    /// itself; anything else renders back to a string, still recording
    /// every referenced ID for the reverse index
    fn lower_template(&mut self, parts: &[TemplatePart], range: &SourceRange) -> Value {
        if let [TemplatePart::Reference(path)] = parts {
            if let Some(elem_id) = self.parse_ref(path, range) {
                return Value::Reference(ReferenceExpression::new(elem_id));
            }
            return Value::String(format!("${{{}}}", path));
        }
        let rendered = parts
            .iter()
            .map(|part| match part {
                TemplatePart::Literal(text) => text.clone(),
                TemplatePart::Reference(path) => {
                    self.parse_ref(path, range);
                    format!("${{{}}}", path)
                }
            })
            .collect();
        Value::String(rendered)
    }

    fn lower_call(&mut self, name: &str, args: &[Expr], range: &SourceRange) -> Value {
        if name != "file" {
            self.errors.push(ParseError::at(
                format!("Unknown function: {}", name),
                range.clone(),
            ));
            return Value::Dynamic;
        }
        match args {
            [Expr::Str { parts, .. }] => {
                let path: String = parts
                    .iter()
                    .map(|part| match part {
                        TemplatePart::Literal(text) => text.clone(),
                        TemplatePart::Reference(path) => format!("${{{}}}", path),
                    })
                    .collect();
                // content is hashed lazily by the workspace; until then the
                // path itself keys the logical identity
                Value::StaticFile(StaticFile::new(path.clone(), path.as_bytes()))
            }
            _ => {
                self.errors.push(ParseError::at(
                    "file() takes a single string argument",
                    range.clone(),
                ));
                Value::Dynamic
            }
        }
    }

    fn parse_ref(&mut self, path: &str, range: &SourceRange) -> Option<ElemID> {
        match ElemID::from_full_name(path) {
            Ok(elem_id) => {
                self.referenced
                    .insert(elem_id.create_top_level_parent_id().0);
                Some(elem_id)
            }
            Err(_) => {
                self.errors.push(ParseError::at(
                    format!("Invalid reference target: {}", path),
                    range.clone(),
                ));
                None
            }
        }
    }

    // --- names and types ---

    /// A type name is exactly `adapter.name`
    fn type_id(&mut self, name: &str, range: &SourceRange) -> Option<ElemID> {
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [adapter, type_name] => Some(ElemID::new(*adapter, *type_name)),
            _ => {
                self.errors.push(ParseError::at(
                    format!("Invalid type name: {}", name),
                    range.clone(),
                ));
                None
            }
        }
    }

    fn parse_type_ref(&mut self, spelled: &str, range: &SourceRange) -> TypeRef {
        if let Some(inner) = spelled
            .strip_prefix("list<")
            .and_then(|s| s.strip_suffix('>'))
        {
            return TypeRef::List(Box::new(self.parse_type_ref(inner, range)));
        }
        if let Some(inner) = spelled
            .strip_prefix("map<")
            .and_then(|s| s.strip_suffix('>'))
        {
            return TypeRef::Map(Box::new(self.parse_type_ref(inner, range)));
        }
        if let Some(kind) = PrimitiveKind::from_name(spelled) {
            return TypeRef::primitive(kind);
        }
        match self.type_id(spelled, range) {
            Some(elem_id) => {
                self.referenced.insert(elem_id.clone());
                TypeRef::Named(elem_id)
            }
            // error already recorded; unknown keeps the element usable
            None => TypeRef::primitive(PrimitiveKind::Unknown),
        }
    }
}
