//! Channel-Access-style translation
//!
//! Channel Access has no structured values, so images and arrays are
//! decomposed into separately addressable child handles in the area-detector
//! naming scheme (`ArrayData_RBV`, `MinX_RBV`, ...). The child handles are
//! read-backs; only scalar parents accept writes over this protocol.

use varmodel::{Kind, Value, Variable};

use super::ProtocolTranslator;
use crate::routing::{Protocol, RoutingEntry};
use crate::wire::{PvSpec, WireValue};

/// Children served for an image variable
const IMAGE_CHILDREN: &[&str] = &[
    "NDimensions_RBV",
    "Dimensions_RBV",
    "ArraySizeX_RBV",
    "ArraySizeY_RBV",
    "ArraySize_RBV",
    "ArrayData_RBV",
    "MinX_RBV",
    "MinY_RBV",
    "MaxX_RBV",
    "MaxY_RBV",
    "ColorMode_RBV",
];

/// Children served for an array variable
const ARRAY_CHILDREN: &[&str] = &["NDimensions_RBV", "Dimensions_RBV", "ArraySize_RBV", "ArrayData_RBV"];

/// Children re-posted when an image value changes
const IMAGE_UPDATE_CHILDREN: &[&str] = &["ArrayData_RBV", "MinX_RBV", "MinY_RBV", "MaxX_RBV", "MaxY_RBV"];

pub struct CaTranslator;

fn selected<'a>(all: &[&'a str], fields: Option<&Vec<String>>) -> Vec<&'a str> {
    match fields {
        None => all.to_vec(),
        Some(list) => all
            .iter()
            .copied()
            .filter(|child| list.iter().any(|f| f.as_str() == *child))
            .collect(),
    }
}

fn child_pvname(pvname: &str, child: &str) -> String {
    format!("{pvname}:{child}")
}

impl ProtocolTranslator for CaTranslator {
    fn protocol(&self) -> Protocol {
        Protocol::Ca
    }

    fn handles(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<PvSpec> {
        match variable.value_or_default() {
            Value::Scalar { value } => {
                let mut spec = PvSpec::new(entry.pvname.clone(), WireValue::Float(*value));
                spec.limits = variable.value_range;
                spec.precision = variable.precision;
                spec.units = variable.units.clone();
                vec![spec]
            }

            Value::Image(image) => selected(IMAGE_CHILDREN, entry.fields.as_ref())
                .into_iter()
                .map(|child| {
                    let initial = match child {
                        "NDimensions_RBV" => WireValue::Float(2.0),
                        "Dimensions_RBV" => WireValue::IntArray(vec![image.rows as i64, image.cols as i64]),
                        "ArraySizeX_RBV" => WireValue::Int(image.rows as i64),
                        "ArraySizeY_RBV" => WireValue::Int(image.cols as i64),
                        "ArraySize_RBV" => WireValue::Int(image.size() as i64),
                        "ArrayData_RBV" => WireValue::FloatArray(image.data.clone()),
                        "MinX_RBV" => WireValue::Float(image.x_min),
                        "MinY_RBV" => WireValue::Float(image.y_min),
                        "MaxX_RBV" => WireValue::Float(image.x_max),
                        "MaxY_RBV" => WireValue::Float(image.y_max),
                        // 2-D grids are monochrome
                        _ => WireValue::Int(0),
                    };

                    let mut spec = PvSpec::new(child_pvname(&entry.pvname, child), initial);
                    if child == "ArrayData_RBV" {
                        spec.precision = variable.precision;
                        spec.units = variable.units.clone();
                    }
                    spec
                })
                .collect(),

            Value::Array(array) => selected(ARRAY_CHILDREN, entry.fields.as_ref())
                .into_iter()
                .map(|child| {
                    let initial = match child {
                        "NDimensions_RBV" => WireValue::Float(1.0),
                        "Dimensions_RBV" => WireValue::IntArray(vec![array.len() as i64]),
                        "ArraySize_RBV" => WireValue::Int(array.len() as i64),
                        _ => WireValue::FloatArray(array.data.clone()),
                    };

                    let mut spec = PvSpec::new(child_pvname(&entry.pvname, child), initial);
                    if child == "ArrayData_RBV" {
                        spec.precision = variable.precision;
                        spec.units = variable.units.clone();
                    }
                    spec
                })
                .collect(),
        }
    }

    fn posts(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<(String, WireValue)> {
        match variable.value_or_default() {
            Value::Scalar { value } => vec![(entry.pvname.clone(), WireValue::Float(*value))],

            Value::Image(image) => selected(IMAGE_UPDATE_CHILDREN, entry.fields.as_ref())
                .into_iter()
                .map(|child| {
                    let value = match child {
                        "ArrayData_RBV" => WireValue::FloatArray(image.data.clone()),
                        "MinX_RBV" => WireValue::Float(image.x_min),
                        "MinY_RBV" => WireValue::Float(image.y_min),
                        "MaxX_RBV" => WireValue::Float(image.x_max),
                        _ => WireValue::Float(image.y_max),
                    };
                    (child_pvname(&entry.pvname, child), value)
                })
                .collect(),

            Value::Array(array) => {
                let children = selected(&["ArrayData_RBV"], entry.fields.as_ref());
                children
                    .into_iter()
                    .map(|child| (child_pvname(&entry.pvname, child), WireValue::FloatArray(array.data.clone())))
                    .collect()
            }
        }
    }

    fn child_pvnames(&self, variable: &Variable, entry: &RoutingEntry) -> Vec<String> {
        let children = match variable.kind() {
            Kind::Scalar => return Vec::new(),
            Kind::Image => selected(IMAGE_CHILDREN, entry.fields.as_ref()),
            Kind::Array => selected(ARRAY_CHILDREN, entry.fields.as_ref()),
        };
        children
            .into_iter()
            .map(|child| child_pvname(&entry.pvname, child))
            .collect()
    }

    fn to_value(&self, wire: WireValue, variable: &Variable) -> Option<Value> {
        match variable.kind() {
            Kind::Scalar => wire.as_float().map(Value::scalar),
            // structured writes are not expressible over Channel Access here;
            // images and arrays are served as read-back children
            Kind::Image | Kind::Array => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use varmodel::ImageValue;

    fn image_variable() -> Variable {
        Variable::image(
            "img",
            ImageValue::new(vec![1.0, 6.0, 4.0, 1.0], 2, 2).with_bounds(0.0, 5.0, 0.0, 5.0),
        )
        .with_units("counts")
    }

    #[test]
    fn test_scalar_handle_carries_display_meta() {
        let variable = Variable::scalar("x", 1.5)
            .with_range(0.0, 5.0)
            .with_units("mm")
            .with_precision(3);
        let entry = RoutingEntry::new("test:x");

        let handles = CaTranslator.handles(&variable, &entry);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].pvname, "test:x");
        assert_eq!(handles[0].initial, WireValue::Float(1.5));
        assert_eq!(handles[0].limits, Some((0.0, 5.0)));
        assert_eq!(handles[0].precision, Some(3));
        assert_eq!(handles[0].units.as_deref(), Some("mm"));
    }

    #[test]
    fn test_image_decomposes_into_children() {
        let variable = image_variable();
        let entry = RoutingEntry::new("test:img");

        let handles = CaTranslator.handles(&variable, &entry);
        assert_eq!(handles.len(), IMAGE_CHILDREN.len());

        let data = handles.iter().find(|h| h.pvname == "test:img:ArrayData_RBV").unwrap();
        assert_eq!(data.initial, WireValue::FloatArray(vec![1.0, 6.0, 4.0, 1.0]));
        assert_eq!(data.units.as_deref(), Some("counts"));

        let size = handles.iter().find(|h| h.pvname == "test:img:ArraySize_RBV").unwrap();
        assert_eq!(size.initial, WireValue::Int(4));

        let max_x = handles.iter().find(|h| h.pvname == "test:img:MaxX_RBV").unwrap();
        assert_eq!(max_x.initial, WireValue::Float(5.0));
    }

    #[test]
    fn test_fields_restrict_children() {
        let variable = image_variable();
        let mut entry = RoutingEntry::new("test:img");
        entry.fields = Some(vec!["ArrayData_RBV".to_string(), "MinX_RBV".to_string()]);

        let handles = CaTranslator.handles(&variable, &entry);
        assert_eq!(handles.len(), 2);

        let posts = CaTranslator.posts(&variable, &entry);
        let names: Vec<&str> = posts.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["test:img:ArrayData_RBV", "test:img:MinX_RBV"]);
    }

    #[test]
    fn test_image_posts_update_data_and_bounds() {
        let variable = image_variable();
        let entry = RoutingEntry::new("test:img");

        let posts = CaTranslator.posts(&variable, &entry);
        assert_eq!(posts.len(), IMAGE_UPDATE_CHILDREN.len());
        assert!(posts.iter().any(|(name, _)| name == "test:img:MaxY_RBV"));
    }

    #[test]
    fn test_array_children() {
        let variable = Variable::array("wave", vec![1.0, 2.0, 3.0]);
        let entry = RoutingEntry::new("test:wave");

        let handles = CaTranslator.handles(&variable, &entry);
        assert_eq!(handles.len(), ARRAY_CHILDREN.len());

        let pvnames = CaTranslator.child_pvnames(&variable, &entry);
        assert!(pvnames.contains(&"test:wave:ArrayData_RBV".to_string()));

        let posts = CaTranslator.posts(&variable, &entry);
        assert_eq!(posts[0].1, WireValue::FloatArray(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_to_value_scalar_only() {
        let scalar = Variable::scalar("x", 0.0);
        assert_eq!(
            CaTranslator.to_value(WireValue::Float(2.0), &scalar),
            Some(Value::scalar(2.0))
        );
        assert_eq!(CaTranslator.to_value(WireValue::Int(2), &scalar), Some(Value::scalar(2.0)));

        let image = image_variable();
        assert_eq!(CaTranslator.to_value(WireValue::FloatArray(vec![1.0]), &image), None);
    }
}
