//! Mapbox vector tile payloads decoded into layers of features

use std::collections::HashMap;

use prost::Message;

use super::error::TileError;

/// Layer extent assumed when the payload omits one
pub const DEFAULT_EXTENT: u32 = 4096;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoTile {
    #[prost(message, repeated, tag = "3")]
    pub layers: Vec<ProtoLayer>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoLayer {
    #[prost(uint32, tag = "15")]
    pub version: u32,
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub features: Vec<ProtoFeature>,
    #[prost(string, repeated, tag = "3")]
    pub keys: Vec<String>,
    #[prost(message, repeated, tag = "4")]
    pub values: Vec<ProtoValue>,
    #[prost(uint32, optional, tag = "5")]
    pub extent: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoFeature {
    #[prost(uint64, optional, tag = "1")]
    pub id: Option<u64>,
    #[prost(uint32, repeated, packed = "true", tag = "2")]
    pub tags: Vec<u32>,
    #[prost(enumeration = "GeomType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(uint32, repeated, packed = "true", tag = "4")]
    pub geometry: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoValue {
    #[prost(string, optional, tag = "1")]
    pub string_value: Option<String>,
    #[prost(float, optional, tag = "2")]
    pub float_value: Option<f32>,
    #[prost(double, optional, tag = "3")]
    pub double_value: Option<f64>,
    #[prost(int64, optional, tag = "4")]
    pub int_value: Option<i64>,
    #[prost(uint64, optional, tag = "5")]
    pub uint_value: Option<u64>,
    #[prost(sint64, optional, tag = "6")]
    pub sint_value: Option<i64>,
    #[prost(bool, optional, tag = "7")]
    pub bool_value: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum GeomType {
    Unknown = 0,
    Point = 1,
    LineString = 2,
    Polygon = 3,
}

/// Scalar attribute value
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    String(String),
    Float(f32),
    Double(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl AttrValue {
    fn from_proto(value: &ProtoValue) -> Option<Self> {
        if let Some(s) = &value.string_value {
            Some(AttrValue::String(s.clone()))
        } else if let Some(v) = value.float_value {
            Some(AttrValue::Float(v))
        } else if let Some(v) = value.double_value {
            Some(AttrValue::Double(v))
        } else if let Some(v) = value.int_value.or(value.sint_value) {
            Some(AttrValue::Int(v))
        } else if let Some(v) = value.uint_value {
            Some(AttrValue::UInt(v))
        } else {
            value.bool_value.map(AttrValue::Bool)
        }
    }
}

/// One step of a feature's geometry, in absolute tile-local units
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryEvent {
    Begin,
    MoveTo(i64, i64),
    LineTo(i64, i64),
    ClosePath,
    End,
}

#[derive(Clone, Debug)]
pub struct VectorFeature {
    pub id: Option<u64>,
    pub kind: GeomType,
    pub attributes: HashMap<String, AttrValue>,
    commands: Vec<GeometryEvent>,
}

impl VectorFeature {
    pub fn is_polygon(&self) -> bool {
        self.kind == GeomType::Polygon
    }

    /// `Begin`, the path commands, then `End`
    pub fn events(&self) -> impl Iterator<Item = GeometryEvent> + '_ {
        std::iter::once(GeometryEvent::Begin)
            .chain(self.commands.iter().copied())
            .chain(std::iter::once(GeometryEvent::End))
    }

    fn decode(layer: &ProtoLayer, feature: &ProtoFeature) -> Result<Self, TileError> {
        let attributes = feature
            .tags
            .chunks_exact(2)
            .filter_map(|pair| {
                let key = layer.keys.get(pair[0] as usize)?;
                let value = layer.values.get(pair[1] as usize).and_then(AttrValue::from_proto)?;
                Some((key.clone(), value))
            })
            .collect();

        Ok(Self {
            id: feature.id,
            kind: feature
                .r#type
                .and_then(|t| GeomType::try_from(t).ok())
                .unwrap_or(GeomType::Unknown),
            attributes,
            commands: decode_geometry(&feature.geometry)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct VectorLayer {
    pub name: String,
    /// Tile-local units per tile edge
    pub extent: u32,
    pub features: Vec<VectorFeature>,
}

/// Decoded vector tile: layers in payload order
#[derive(Clone, Debug, Default)]
pub struct VectorTile {
    pub layers: Vec<VectorLayer>,
}

impl VectorTile {
    pub fn decode(data: &[u8]) -> Result<Self, TileError> {
        let tile = ProtoTile::decode(data)?;
        let mut layers = Vec::with_capacity(tile.layers.len());
        for layer in &tile.layers {
            let features = layer
                .features
                .iter()
                .map(|f| VectorFeature::decode(layer, f))
                .collect::<Result<Vec<_>, _>>()?;
            layers.push(VectorLayer {
                name: if layer.name.is_empty() {
                    "%no-name%".to_string()
                } else {
                    layer.name.clone()
                },
                extent: layer.extent.filter(|e| *e > 0).unwrap_or(DEFAULT_EXTENT),
                features,
            });
        }
        Ok(Self { layers })
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }
}

fn zigzag(n: u32) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Expand the command/parameter integer stream into absolute positions
fn decode_geometry(stream: &[u32]) -> Result<Vec<GeometryEvent>, TileError> {
    let mut events = Vec::new();
    let (mut cx, mut cy) = (0_i64, 0_i64);
    let mut it = stream.iter().copied();
    while let Some(header) = it.next() {
        let id = header & 0x7;
        let count = header >> 3;
        match id {
            CMD_MOVE_TO | CMD_LINE_TO => {
                for _ in 0..count {
                    let dx = it.next().ok_or(TileError::TruncatedGeometry)?;
                    let dy = it.next().ok_or(TileError::TruncatedGeometry)?;
                    cx += zigzag(dx);
                    cy += zigzag(dy);
                    events.push(if id == CMD_MOVE_TO {
                        GeometryEvent::MoveTo(cx, cy)
                    } else {
                        GeometryEvent::LineTo(cx, cy)
                    });
                }
            }
            CMD_CLOSE_PATH => {
                events.extend(std::iter::repeat_n(GeometryEvent::ClosePath, count as usize));
            }
            other => return Err(TileError::Geometry(other)),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::testing::{command, zigzag as zz};

    fn encode(layers: Vec<ProtoLayer>) -> Vec<u8> {
        ProtoTile { layers }.encode_to_vec()
    }

    fn square_layer() -> ProtoLayer {
        ProtoLayer {
            version: 2,
            name: "building".into(),
            features: vec![ProtoFeature {
                id: Some(7),
                tags: vec![0, 1, 1, 0],
                r#type: Some(GeomType::Polygon as i32),
                geometry: vec![
                    command(1, 1),
                    zz(3),
                    zz(6),
                    command(2, 2),
                    zz(5),
                    zz(0),
                    zz(0),
                    zz(-4),
                    command(7, 1),
                ],
            }],
            keys: vec!["name".into(), "height".into()],
            values: vec![
                ProtoValue {
                    int_value: Some(12),
                    ..Default::default()
                },
                ProtoValue {
                    string_value: Some("hall".into()),
                    ..Default::default()
                },
            ],
            extent: None,
        }
    }

    #[test]
    fn test_decode_geometry_events() {
        let tile = VectorTile::decode(&encode(vec![square_layer()])).unwrap();
        let feature = &tile.layers[0].features[0];
        let events: Vec<_> = feature.events().collect();
        assert_eq!(
            events,
            vec![
                GeometryEvent::Begin,
                GeometryEvent::MoveTo(3, 6),
                GeometryEvent::LineTo(8, 6),
                GeometryEvent::LineTo(8, 2),
                GeometryEvent::ClosePath,
                GeometryEvent::End,
            ]
        );
        assert!(feature.is_polygon());
        assert_eq!(feature.id, Some(7));
    }

    #[test]
    fn test_attributes_pair_keys_with_values() {
        let tile = VectorTile::decode(&encode(vec![square_layer()])).unwrap();
        let feature = &tile.layers[0].features[0];
        assert_eq!(
            feature.attributes.get("name"),
            Some(&AttrValue::String("hall".to_string()))
        );
        assert_eq!(feature.attributes.get("height"), Some(&AttrValue::Int(12)));
    }

    #[test]
    fn test_layer_defaults() {
        let mut layer = square_layer();
        layer.name.clear();
        let tile = VectorTile::decode(&encode(vec![layer])).unwrap();
        assert_eq!(tile.layers[0].name, "%no-name%");
        assert_eq!(tile.layers[0].extent, DEFAULT_EXTENT);
        assert_eq!(tile.feature_count(), 1);
    }

    #[test]
    fn test_bad_command_id() {
        let mut layer = square_layer();
        layer.features[0].geometry = vec![command(4, 1), 0, 0];
        let err = VectorTile::decode(&encode(vec![layer])).unwrap_err();
        assert!(matches!(err, TileError::Geometry(4)));
    }

    #[test]
    fn test_truncated_geometry() {
        let mut layer = square_layer();
        layer.features[0].geometry = vec![command(2, 2), zz(1), zz(1), zz(1)];
        let err = VectorTile::decode(&encode(vec![layer])).unwrap_err();
        assert!(matches!(err, TileError::TruncatedGeometry));
    }

    #[test]
    fn test_garbage_payload() {
        assert!(matches!(
            VectorTile::decode(&[0xff, 0xff, 0xff]),
            Err(TileError::Protobuf(_))
        ));
    }
}
