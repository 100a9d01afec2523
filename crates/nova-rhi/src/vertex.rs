//! Vertex input layout derived from a pipeline's declared vertex fields.

use nova_core::shaderpack::{VertexField, VertexFieldData};

/// One vertex attribute. Each field gets its own binding, numbered by its
/// position in the pipeline's field list, and every binding reads the same
/// interleaved vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    /// Byte offset of the field inside one vertex
    pub offset: u32,
    pub field: VertexField,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    /// Size of one vertex: the fields packed back to back
    pub stride: u32,
}

impl VertexLayout {
    pub fn from_fields(fields: &[VertexFieldData]) -> Self {
        let mut offset = 0;
        let attributes = (0u32..)
            .zip(fields)
            .map(|(index, field)| {
                let attribute = VertexAttribute {
                    location: index,
                    binding: index,
                    offset,
                    field: field.field,
                };
                offset += field.field.size_in_bytes();
                attribute
            })
            .collect();

        Self {
            attributes,
            stride: offset,
        }
    }

    /// Number of vertex buffer bindings a draw with this layout needs.
    pub fn num_bindings(&self) -> usize {
        self.attributes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn field(name: &str, field: VertexField) -> VertexFieldData {
        VertexFieldData {
            semantic_name: name.to_string(),
            field,
        }
    }

    #[test]
    fn offsets_accumulate_in_declaration_order() {
        let layout = VertexLayout::from_fields(&[
            field("position", VertexField::Position),
            field("color", VertexField::Color),
            field("uv", VertexField::Uv0),
        ]);

        let offsets: Vec<_> = layout
            .attributes
            .iter()
            .map(|attribute| (attribute.binding, attribute.offset))
            .collect();
        assert_eq!(offsets, vec![(0, 0), (1, 12), (2, 16)]);
        assert_eq!(layout.stride, 24);
    }

    #[test]
    fn no_fields_means_no_bindings() {
        let layout = VertexLayout::from_fields(&[]);
        assert_eq!(layout.num_bindings(), 0);
        assert_eq!(layout.stride, 0);
    }
}
