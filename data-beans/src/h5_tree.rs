use hdf5::types::{FixedAscii, FixedUnicode, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Container, Extents, Group, H5Type, Location};
use log::warn;
use std::collections::BTreeMap;

/// Flat values of an HDF5 dataset or attribute, row-major
#[derive(Debug, Clone, PartialEq)]
pub enum H5Array {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Unsigned(Vec<u64>),
    Bool(Vec<bool>),
    Text(Vec<Box<str>>),
}

/// An array with its shape; an empty shape is a scalar
#[derive(Debug, Clone, PartialEq)]
pub struct H5Values {
    pub shape: Vec<usize>,
    pub data: H5Array,
}

impl H5Values {
    pub fn scalar_text(value: &str) -> Self {
        Self {
            shape: vec![],
            data: H5Array::Text(vec![value.into()]),
        }
    }
}

pub type H5Attrs = BTreeMap<String, H5Values>;

/// An HDF5 subtree held in memory, for entries we carry through
/// without interpreting them (`uns`)
#[derive(Debug, Clone, PartialEq)]
pub enum H5Node {
    Group {
        attrs: H5Attrs,
        members: BTreeMap<String, H5Node>,
    },
    Dataset {
        attrs: H5Attrs,
        values: H5Values,
    },
}

/// Every member of `group`; members of unsupported types are skipped
pub fn read_members(group: &Group) -> anyhow::Result<BTreeMap<String, H5Node>> {
    let mut ret = BTreeMap::new();
    for name in group.member_names()? {
        match read_node(group, &name)? {
            Some(node) => {
                ret.insert(name, node);
            }
            None => warn!("skipping {}/{}", group.name(), name),
        }
    }
    Ok(ret)
}

fn read_node(parent: &Group, name: &str) -> anyhow::Result<Option<H5Node>> {
    if let Ok(group) = parent.group(name) {
        return Ok(Some(H5Node::Group {
            attrs: read_attrs(&group)?,
            members: read_members(&group)?,
        }));
    }
    let ds = parent.dataset(name)?;
    Ok(read_values(&ds)?.map(|values| H5Node::Dataset {
        attrs: read_attrs(&ds).unwrap_or_default(),
        values,
    }))
}

fn read_attrs(loc: &Location) -> anyhow::Result<H5Attrs> {
    let mut ret = H5Attrs::new();
    for name in loc.attr_names()? {
        let attr = loc.attr(&name)?;
        if let Some(values) = read_values(&attr)? {
            ret.insert(name, values);
        }
    }
    Ok(ret)
}

/// `None` for element types other than numbers, booleans and strings
pub fn read_values(data: &Container) -> anyhow::Result<Option<H5Values>> {
    let shape = data.shape();
    let array = match data.dtype()?.to_descriptor()? {
        TypeDescriptor::Float(_) => H5Array::Float(data.read_raw::<f64>()?),
        TypeDescriptor::Integer(_) => H5Array::Int(data.read_raw::<i64>()?),
        TypeDescriptor::Unsigned(_) => H5Array::Unsigned(data.read_raw::<u64>()?),
        TypeDescriptor::Boolean => H5Array::Bool(data.read_raw::<bool>()?),
        TypeDescriptor::VarLenUnicode => H5Array::Text(to_box_str(data.read_raw::<VarLenUnicode>()?)),
        TypeDescriptor::VarLenAscii => H5Array::Text(to_box_str(data.read_raw::<VarLenAscii>()?)),
        TypeDescriptor::FixedAscii(n) => H5Array::Text(if n < 24 {
            to_box_str(data.read_raw::<FixedAscii<24>>()?)
        } else if n < 128 {
            to_box_str(data.read_raw::<FixedAscii<128>>()?)
        } else {
            to_box_str(data.read_raw::<FixedAscii<1024>>()?)
        }),
        TypeDescriptor::FixedUnicode(n) => H5Array::Text(if n < 24 {
            to_box_str(data.read_raw::<FixedUnicode<24>>()?)
        } else if n < 128 {
            to_box_str(data.read_raw::<FixedUnicode<128>>()?)
        } else {
            to_box_str(data.read_raw::<FixedUnicode<1024>>()?)
        }),
        _ => return Ok(None),
    };
    Ok(Some(H5Values { shape, data: array }))
}

fn to_box_str<T: ToString>(values: Vec<T>) -> Vec<Box<str>> {
    values
        .into_iter()
        .map(|x| x.to_string().into_boxed_str())
        .collect()
}

pub fn write_members(group: &Group, members: &BTreeMap<String, H5Node>) -> anyhow::Result<()> {
    for (name, node) in members.iter() {
        write_node(group, name, node)?;
    }
    Ok(())
}

fn write_node(parent: &Group, name: &str, node: &H5Node) -> anyhow::Result<()> {
    match node {
        H5Node::Group { attrs, members } => {
            let g = parent.create_group(name)?;
            write_attrs(&g, attrs)?;
            write_members(&g, members)?;
        }
        H5Node::Dataset { attrs, values } => {
            let ds = match &values.data {
                H5Array::Float(v) => create_dataset(parent, name, &values.shape, v)?,
                H5Array::Int(v) => create_dataset(parent, name, &values.shape, v)?,
                H5Array::Unsigned(v) => create_dataset(parent, name, &values.shape, v)?,
                H5Array::Bool(v) => create_dataset(parent, name, &values.shape, v)?,
                H5Array::Text(v) => create_dataset(parent, name, &values.shape, &to_varlen(v)?)?,
            };
            write_attrs(&ds, attrs)?;
        }
    }
    Ok(())
}

fn write_attrs(loc: &Location, attrs: &H5Attrs) -> anyhow::Result<()> {
    for (name, values) in attrs.iter() {
        match &values.data {
            H5Array::Float(v) => create_attr(loc, name, &values.shape, v)?,
            H5Array::Int(v) => create_attr(loc, name, &values.shape, v)?,
            H5Array::Unsigned(v) => create_attr(loc, name, &values.shape, v)?,
            H5Array::Bool(v) => create_attr(loc, name, &values.shape, v)?,
            H5Array::Text(v) => create_attr(loc, name, &values.shape, &to_varlen(v)?)?,
        }
    }
    Ok(())
}

fn extents(shape: &[usize]) -> Extents {
    if shape.is_empty() {
        Extents::from(())
    } else {
        Extents::from(shape.to_vec())
    }
}

fn create_dataset<T: H5Type>(
    parent: &Group,
    name: &str,
    shape: &[usize],
    values: &[T],
) -> anyhow::Result<hdf5::Dataset> {
    let ds = parent.new_dataset::<T>().shape(extents(shape)).create(name)?;
    if !values.is_empty() {
        ds.write_raw(values)?;
    }
    Ok(ds)
}

fn create_attr<T: H5Type>(
    loc: &Location,
    name: &str,
    shape: &[usize],
    values: &[T],
) -> anyhow::Result<()> {
    let attr = loc.new_attr::<T>().shape(extents(shape)).create(name)?;
    if !values.is_empty() {
        attr.write_raw(values)?;
    }
    Ok(())
}

pub fn to_varlen(values: &[impl AsRef<str>]) -> anyhow::Result<Vec<VarLenUnicode>> {
    values
        .iter()
        .map(|x| {
            x.as_ref()
                .parse::<VarLenUnicode>()
                .map_err(|e| anyhow::anyhow!("invalid string {}: {}", x.as_ref(), e))
        })
        .collect()
}
