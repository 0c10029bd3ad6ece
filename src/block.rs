//! Decoding of a decompressed `PrimitiveBlock`: the string table, the
//! granularity/offset metadata, and the entities in each `PrimitiveGroup`.
//!
//! Everything here borrows directly from the block's decompressed byte
//! buffer — no entity is copied out of the wire representation before the
//! consumer sees it.

use crate::error::Error;
use crate::stringtable::StringTable;
use crate::util::{decode_coordinate, decode_timestamp_millis};
use crate::wire::{DeltaPackedSvarints, FieldScanner, PackedUvarints};

/// A fully-scanned `PrimitiveBlock`, ready to iterate groups from.
pub struct PrimitiveBlock<'a> {
    pub string_table: StringTable<'a>,
    pub granularity: i32,
    pub date_granularity: i32,
    pub lat_offset: i64,
    pub lon_offset: i64,
    groups: Vec<Group<'a>>,
}

/// One `PrimitiveGroup`'s raw contents, dispatched by which sub-field it
/// populates. Ways, relations and sparse nodes may repeat within a group;
/// dense nodes are a single sub-message.
enum Group<'a> {
    Dense(&'a [u8]),
    Ways(Vec<&'a [u8]>),
    Relations(Vec<&'a [u8]>),
    Sparse(Vec<&'a [u8]>),
    ChangeSet,
    Empty,
}

impl<'a> PrimitiveBlock<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        let mut string_table = None;
        let mut granularity = 100;
        let mut date_granularity = 1000;
        let mut lat_offset = 0i64;
        let mut lon_offset = 0i64;
        let mut groups = Vec::new();

        for field in FieldScanner::new(buf) {
            let field = field?;
            match field.number {
                1 => string_table = Some(StringTable::parse(field.bytes()?)?),
                2 => groups.push(parse_group(field.bytes()?)?),
                17 => granularity = field.as_int64()? as i32,
                18 => date_granularity = field.as_int64()? as i32,
                19 => lat_offset = field.as_int64()?,
                20 => lon_offset = field.as_int64()?,
                _ => {}
            }
        }

        Ok(PrimitiveBlock {
            string_table: string_table.unwrap_or_else(|| StringTable::parse(&[]).expect("empty buffer parses")),
            granularity,
            date_granularity,
            lat_offset,
            lon_offset,
            groups,
        })
    }

    /// Whether any group in this block is a changeset group (out of scope;
    /// the pipeline reports one [`crate::error::Warning::SkippedChangeSetGroup`]
    /// per such group).
    pub fn changeset_group_count(&self) -> usize {
        self.groups.iter().filter(|g| matches!(g, Group::ChangeSet)).count()
    }

    /// Iterates every dense-node group's decoded nodes, in group order.
    pub fn dense_nodes(&'a self) -> impl Iterator<Item = Result<Node<'a>, Error>> + 'a {
        self.groups.iter().flat_map(move |g| -> Box<dyn Iterator<Item = Result<Node<'a>, Error>> + 'a> {
            match g {
                Group::Dense(buf) => match DenseNodeIter::new(buf, self) {
                    Ok(iter) => Box::new(iter),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                },
                _ => Box::new(std::iter::empty()),
            }
        })
    }

    /// Iterates every sparse-node group's decoded nodes, in group order.
    pub fn sparse_nodes(&'a self) -> impl Iterator<Item = Result<Node<'a>, Error>> + 'a {
        self.groups.iter().filter_map(move |g| match g {
            Group::Sparse(msgs) => Some(msgs.iter().map(move |m| parse_sparse_node(m, self))),
            _ => None,
        }).flatten()
    }

    /// Iterates every way, in group then declaration order.
    pub fn ways(&'a self) -> impl Iterator<Item = Result<Way<'a>, Error>> + 'a {
        self.groups.iter().filter_map(move |g| match g {
            Group::Ways(msgs) => Some(msgs.iter().map(move |m| parse_way(m, self))),
            _ => None,
        }).flatten()
    }

    /// Iterates every relation, in group then declaration order.
    pub fn relations(&'a self) -> impl Iterator<Item = Result<Relation<'a>, Error>> + 'a {
        self.groups.iter().filter_map(move |g| match g {
            Group::Relations(msgs) => Some(msgs.iter().map(move |m| parse_relation(m, self))),
            _ => None,
        }).flatten()
    }
}

fn parse_group(buf: &[u8]) -> Result<Group<'_>, Error> {
    let mut dense = None;
    let mut ways = Vec::new();
    let mut relations = Vec::new();
    let mut sparse = Vec::new();
    let mut has_changeset = false;

    for field in FieldScanner::new(buf) {
        let field = field?;
        match field.number {
            2 => dense = Some(field.bytes()?),
            3 => ways.push(field.bytes()?),
            4 => relations.push(field.bytes()?),
            1 => sparse.push(field.bytes()?),
            5 => has_changeset = true,
            _ => {}
        }
    }

    if let Some(buf) = dense {
        Ok(Group::Dense(buf))
    } else if !ways.is_empty() {
        Ok(Group::Ways(ways))
    } else if !relations.is_empty() {
        Ok(Group::Relations(relations))
    } else if !sparse.is_empty() {
        Ok(Group::Sparse(sparse))
    } else if has_changeset {
        Ok(Group::ChangeSet)
    } else {
        Ok(Group::Empty)
    }
}

/// A decoded OSM node: an identifier, a reconstructed coordinate, and a
/// lazily-iterated tag set.
pub struct Node<'a> {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub timestamp_millis: Option<i64>,
    tags: Tags<'a>,
}

impl<'a> Node<'a> {
    pub fn tags(&self) -> TagsIter<'a> {
        self.tags.iter()
    }
}

/// A decoded OSM way: an identifier, tags, and its ordered node references.
pub struct Way<'a> {
    pub id: i64,
    refs_raw: &'a [u8],
    tags: Tags<'a>,
}

impl<'a> Way<'a> {
    pub fn tags(&self) -> TagsIter<'a> {
        self.tags.iter()
    }

    pub fn refs(&self) -> impl Iterator<Item = Result<i64, Error>> + 'a {
        DeltaPackedSvarints::new(self.refs_raw)
    }
}

/// A single member of a relation.
#[derive(Debug, Clone, Copy)]
pub struct Member<'a> {
    pub reference: i64,
    pub member_type: MemberType,
    pub role: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

/// A decoded OSM relation: an identifier, tags, and its ordered members.
pub struct Relation<'a> {
    pub id: i64,
    memids_raw: &'a [u8],
    types_raw: &'a [u8],
    roles_sid_raw: &'a [u8],
    table: &'a StringTable<'a>,
    tags: Tags<'a>,
}

impl<'a> Relation<'a> {
    pub fn tags(&self) -> TagsIter<'a> {
        self.tags.iter()
    }

    pub fn members(&self) -> MembersIter<'a> {
        MembersIter {
            memids: DeltaPackedSvarints::new(self.memids_raw),
            types: PackedUvarints::new(self.types_raw),
            roles: PackedUvarints::new(self.roles_sid_raw),
            table: self.table,
        }
    }
}

pub struct MembersIter<'a> {
    memids: DeltaPackedSvarints<'a>,
    types: PackedUvarints<'a>,
    roles: PackedUvarints<'a>,
    table: &'a StringTable<'a>,
}

impl<'a> Iterator for MembersIter<'a> {
    type Item = Result<Member<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let reference = match self.memids.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                return if self.types.is_exhausted() && self.roles.is_exhausted() {
                    None
                } else {
                    Some(Err(Error::ParallelArrayLengthMismatch(
                        "relation memids shorter than types/roles_sid".into(),
                    )))
                };
            }
        };

        let raw_type = match self.types.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                return Some(Err(Error::ParallelArrayLengthMismatch(
                    "relation types shorter than memids".into(),
                )));
            }
        };
        let member_type = match raw_type {
            0 => MemberType::Node,
            1 => MemberType::Way,
            2 => MemberType::Relation,
            other => return Some(Err(Error::MalformedMemberType(other as i64))),
        };

        let role_sid = match self.roles.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                return Some(Err(Error::ParallelArrayLengthMismatch(
                    "relation roles_sid shorter than memids".into(),
                )));
            }
        };
        let role = match self.table.get(role_sid as u32) {
            Ok(s) => s,
            Err(e) => return Some(Err(e)),
        };

        Some(Ok(Member { reference, member_type, role }))
    }
}

/// A lazily-iterated key/value tag set, sourced either from a dense node's
/// zero-terminated interleaved run or a way/relation's parallel key and
/// value arrays.
struct Tags<'a> {
    table: &'a StringTable<'a>,
    data: TagData<'a>,
}

enum TagData<'a> {
    Interleaved(&'a [u8]),
    Parallel(&'a [u8], &'a [u8]),
}

impl<'a> Tags<'a> {
    fn iter(&self) -> TagsIter<'a> {
        match self.data {
            TagData::Interleaved(buf) => TagsIter {
                table: self.table,
                kind: TagsIterKind::Interleaved(PackedUvarints::new(buf)),
            },
            TagData::Parallel(keys, vals) => TagsIter {
                table: self.table,
                kind: TagsIterKind::Parallel(PackedUvarints::new(keys), PackedUvarints::new(vals)),
            },
        }
    }
}

pub struct TagsIter<'a> {
    table: &'a StringTable<'a>,
    kind: TagsIterKind<'a>,
}

enum TagsIterKind<'a> {
    Interleaved(PackedUvarints<'a>),
    Parallel(PackedUvarints<'a>, PackedUvarints<'a>),
}

impl<'a> Iterator for TagsIter<'a> {
    type Item = Result<(&'a str, &'a str), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.kind {
            TagsIterKind::Interleaved(pairs) => {
                let k = match pairs.next()? {
                    Ok(v) => v,
                    Err(e) => return Some(Err(e)),
                };
                let v = match pairs.next() {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        return Some(Err(Error::MalformedTagStream(
                            "odd number of tag indices before terminator".into(),
                        )));
                    }
                };
                Some(resolve_tag(self.table, k, v))
            }
            TagsIterKind::Parallel(keys, vals) => {
                let k = match keys.next() {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some(Err(e)),
                    None => return if vals.is_exhausted() { None } else {
                        Some(Err(Error::ParallelArrayLengthMismatch("keys shorter than vals".into())))
                    },
                };
                let v = match vals.next() {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Some(Err(e)),
                    None => return Some(Err(Error::ParallelArrayLengthMismatch("vals shorter than keys".into()))),
                };
                Some(resolve_tag(self.table, k, v))
            }
        }
    }
}

fn resolve_tag<'a>(table: &'a StringTable<'a>, key_index: u64, val_index: u64) -> Result<(&'a str, &'a str), Error> {
    let key = table.get(key_index as u32)?;
    let value = table.get(val_index as u32)?;
    Ok((key, value))
}

/// Iterates the nodes of a single `DenseNodes` sub-message.
struct DenseNodeIter<'a> {
    ids: DeltaPackedSvarints<'a>,
    lats: DeltaPackedSvarints<'a>,
    lons: DeltaPackedSvarints<'a>,
    tag_cursor: Option<PackedUvarints<'a>>,
    timestamps: Option<DeltaPackedSvarints<'a>>,
    block: &'a PrimitiveBlock<'a>,
}

impl<'a> DenseNodeIter<'a> {
    fn new(buf: &'a [u8], block: &'a PrimitiveBlock<'a>) -> Result<Self, Error> {
        let mut ids_raw = None;
        let mut lats_raw = None;
        let mut lons_raw = None;
        let mut keys_vals_raw = None;
        let mut timestamps_raw = None;

        for field in FieldScanner::new(buf) {
            let field = field?;
            match field.number {
                1 => ids_raw = Some(field.bytes()?),
                8 => lats_raw = Some(field.bytes()?),
                9 => lons_raw = Some(field.bytes()?),
                10 => keys_vals_raw = Some(field.bytes()?),
                5 => timestamps_raw = parse_denseinfo_timestamps(field.bytes()?)?,
                _ => {}
            }
        }

        let ids_raw = ids_raw.ok_or_else(|| Error::MalformedField("DenseNodes missing id array".into()))?;
        let lats_raw = lats_raw.ok_or_else(|| Error::MalformedField("DenseNodes missing lat array".into()))?;
        let lons_raw = lons_raw.ok_or_else(|| Error::MalformedField("DenseNodes missing lon array".into()))?;

        Ok(DenseNodeIter {
            ids: DeltaPackedSvarints::new(ids_raw),
            lats: DeltaPackedSvarints::new(lats_raw),
            lons: DeltaPackedSvarints::new(lons_raw),
            tag_cursor: keys_vals_raw.map(PackedUvarints::new),
            timestamps: timestamps_raw.map(DeltaPackedSvarints::new),
            block,
        })
    }
}

/// Extracts field 2 (`timestamp`, packed sint64 delta) from a `DenseInfo`
/// sub-message, ignoring its version/changeset/user fields, which this
/// reader's data model does not surface.
fn parse_denseinfo_timestamps(buf: &[u8]) -> Result<Option<&[u8]>, Error> {
    let mut timestamps = None;
    for field in FieldScanner::new(buf) {
        let field = field?;
        if field.number == 2 {
            timestamps = Some(field.bytes()?);
        }
    }
    Ok(timestamps)
}

impl<'a> Iterator for DenseNodeIter<'a> {
    type Item = Result<Node<'a>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = match self.ids.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => {
                if !(self.lats.is_exhausted() && self.lons.is_exhausted()) {
                    return Some(Err(Error::ParallelArrayLengthMismatch("dense id array shorter than lat/lon".into())));
                }
                if let Some(cursor) = &self.tag_cursor {
                    if !cursor.is_exhausted() {
                        return Some(Err(Error::MalformedTagStream(
                            "keys_vals has trailing data after the last node's terminator".into(),
                        )));
                    }
                }
                return None;
            }
        };

        let lat = match self.lats.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => return Some(Err(Error::ParallelArrayLengthMismatch("dense lat array too short".into()))),
        };
        let lon = match self.lons.next() {
            Some(Ok(v)) => v,
            Some(Err(e)) => return Some(Err(e)),
            None => return Some(Err(Error::ParallelArrayLengthMismatch("dense lon array too short".into()))),
        };

        let timestamp_millis = match &mut self.timestamps {
            Some(ts) => match ts.next() {
                Some(Ok(v)) => Some(decode_timestamp_millis(v, self.block.date_granularity)),
                Some(Err(e)) => return Some(Err(e)),
                None => None,
            },
            None => None,
        };

        let tags = match &mut self.tag_cursor {
            Some(cursor) => match cursor.next_zero_terminated_run() {
                Ok(Some(run)) => Tags { table: &self.block.string_table, data: TagData::Interleaved(run) },
                Ok(None) => {
                    return Some(Err(Error::MalformedTagStream(
                        "keys_vals ran out of terminated runs before the last dense node".into(),
                    )))
                }
                Err(e) => return Some(Err(e)),
            },
            None => Tags { table: &self.block.string_table, data: TagData::Interleaved(&[]) },
        };

        Some(Ok(Node {
            id,
            lat: decode_coordinate(lat, self.block.granularity, self.block.lat_offset),
            lon: decode_coordinate(lon, self.block.granularity, self.block.lon_offset),
            timestamp_millis,
            tags,
        }))
    }
}

fn parse_sparse_node<'a>(buf: &'a [u8], block: &'a PrimitiveBlock<'a>) -> Result<Node<'a>, Error> {
    let mut id = None;
    let mut lat = None;
    let mut lon = None;
    let mut keys_raw: &[u8] = &[];
    let mut vals_raw: &[u8] = &[];

    for field in FieldScanner::new(buf) {
        let field = field?;
        match field.number {
            1 => id = Some(field.as_svarint()?),
            2 => keys_raw = field.bytes()?,
            3 => vals_raw = field.bytes()?,
            8 => lat = Some(field.as_svarint()?),
            9 => lon = Some(field.as_svarint()?),
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::MalformedField("Node missing id".into()))?;
    let lat = lat.ok_or_else(|| Error::MalformedField("Node missing lat".into()))?;
    let lon = lon.ok_or_else(|| Error::MalformedField("Node missing lon".into()))?;

    Ok(Node {
        id,
        lat: decode_coordinate(lat, block.granularity, block.lat_offset),
        lon: decode_coordinate(lon, block.granularity, block.lon_offset),
        timestamp_millis: None,
        tags: Tags { table: &block.string_table, data: TagData::Parallel(keys_raw, vals_raw) },
    })
}

fn parse_way<'a>(buf: &'a [u8], block: &'a PrimitiveBlock<'a>) -> Result<Way<'a>, Error> {
    let mut id = None;
    let mut keys_raw: &[u8] = &[];
    let mut vals_raw: &[u8] = &[];
    let mut refs_raw: &[u8] = &[];

    for field in FieldScanner::new(buf) {
        let field = field?;
        match field.number {
            1 => id = Some(field.as_int64()?),
            2 => keys_raw = field.bytes()?,
            3 => vals_raw = field.bytes()?,
            8 => refs_raw = field.bytes()?,
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::MalformedField("Way missing id".into()))?;

    Ok(Way {
        id,
        refs_raw,
        tags: Tags { table: &block.string_table, data: TagData::Parallel(keys_raw, vals_raw) },
    })
}

fn parse_relation<'a>(buf: &'a [u8], block: &'a PrimitiveBlock<'a>) -> Result<Relation<'a>, Error> {
    let mut id = None;
    let mut keys_raw: &[u8] = &[];
    let mut vals_raw: &[u8] = &[];
    let mut roles_sid_raw: &[u8] = &[];
    let mut memids_raw: &[u8] = &[];
    let mut types_raw: &[u8] = &[];

    for field in FieldScanner::new(buf) {
        let field = field?;
        match field.number {
            1 => id = Some(field.as_int64()?),
            2 => keys_raw = field.bytes()?,
            3 => vals_raw = field.bytes()?,
            8 => roles_sid_raw = field.bytes()?,
            9 => memids_raw = field.bytes()?,
            10 => types_raw = field.bytes()?,
            _ => {}
        }
    }

    let id = id.ok_or_else(|| Error::MalformedField("Relation missing id".into()))?;

    Ok(Relation {
        id,
        memids_raw,
        types_raw,
        roles_sid_raw,
        table: &block.string_table,
        tags: Tags { table: &block.string_table, data: TagData::Parallel(keys_raw, vals_raw) },
    })
}
