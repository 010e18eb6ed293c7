//! Page layouts from TIFF `ImageDescription` tags.
//!
//! Multi-page TIFF files store one 2-D plane per page. The order of the outer axes is recorded
//! in the description by OME-XML and ImageJ writers. Layouts are returned as an [AxisSpec] of the
//! outer axes, slowest first.

use crate::error::MaxProjError;
use crate::models::{AxisLabel, AxisSpec, PlaneShape};

/// Returns the page layout described by an `ImageDescription`, if it is in a known format.
pub fn page_layout(description: &str) -> Option<Result<AxisSpec, MaxProjError>> {
    let description = description.trim_start();
    if description.starts_with("ImageJ=") {
        Some(parse_imagej(description))
    } else if description.starts_with("<?xml") || description.starts_with("<OME") {
        parse_ome(description)
    } else {
        None
    }
}

/// Parse an ImageJ hyperstack description. Pages are ordered with channels fastest, then
/// slices, then frames.
fn parse_imagej(description: &str) -> Result<AxisSpec, MaxProjError> {
    let mut channels = 1;
    let mut slices = 1;
    let mut frames = 1;
    for line in description.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let target = match key.trim() {
            "channels" => &mut channels,
            "slices" => &mut slices,
            "frames" => &mut frames,
            _ => continue,
        };
        *target = value.trim().parse::<usize>().map_err(|_| {
            MaxProjError::InvalidLayout(format!("invalid ImageJ {} value {:?}", key, value))
        })?;
    }
    AxisSpec::new(vec![
        (AxisLabel::Time, frames),
        (AxisLabel::Depth, slices),
        (AxisLabel::Channel, channels),
    ])
}

/// Parse the first `Pixels` element of an OME-XML description.
fn parse_ome(description: &str) -> Option<Result<AxisSpec, MaxProjError>> {
    let tag = find_element(description, "Pixels")?;
    Some(ome_layout(&parse_attributes(tag)))
}

/// Build the page layout from the attributes of an OME `Pixels` element.
fn ome_layout(attributes: &[(&str, &str)]) -> Result<AxisSpec, MaxProjError> {
    let get = |name: &str| {
        attributes
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    };
    let size = |name: &str| -> Result<usize, MaxProjError> {
        match get(name) {
            None => Ok(1),
            Some(value) => value.parse().map_err(|_| {
                MaxProjError::InvalidLayout(format!("invalid OME {} value {:?}", name, value))
            }),
        }
    };
    let order = get("DimensionOrder").unwrap_or("XYCZT");
    if order.len() != 5 || !order.starts_with("XY") {
        return Err(MaxProjError::InvalidLayout(format!(
            "unsupported OME dimension order {:?}",
            order
        )));
    }
    let mut axes = vec![];
    for code in order[2..].chars().rev() {
        let label = AxisLabel::from_code(code)?;
        let length = match label {
            AxisLabel::Time => size("SizeT")?,
            AxisLabel::Depth => size("SizeZ")?,
            AxisLabel::Channel => size("SizeC")?,
            other => {
                return Err(MaxProjError::InvalidLayout(format!(
                    "unexpected {} axis in OME dimension order",
                    other
                )))
            }
        };
        axes.push((label, length));
    }
    AxisSpec::new(axes)
}

/// Returns the text of the first start tag named `name` (with or without a namespace prefix),
/// excluding the angle brackets.
///
/// Comments and CDATA sections are skipped. Entities in attribute values are not decoded, which
/// is enough for the numeric and enumerated attributes read here.
fn find_element<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = xml;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let skipped = [("!--", "-->"), ("![CDATA[", "]]>")]
            .into_iter()
            .find(|(open, _)| after.starts_with(open));
        if let Some((_, close)) = skipped {
            rest = &after[after.find(close)? + close.len()..];
            continue;
        }
        let end = after.find('>')?;
        let tag = &after[..end];
        let tag_name = tag.split_whitespace().next().unwrap_or("");
        let local = tag_name.rsplit(':').next().unwrap_or(tag_name);
        if local.trim_end_matches('/') == name {
            return Some(tag);
        }
        rest = &after[end + 1..];
    }
    None
}

/// Parse `key="value"` attributes from the text of a start tag.
fn parse_attributes(tag: &str) -> Vec<(&str, &str)> {
    let mut attributes = vec![];
    // Skip the element name.
    let mut rest = tag.trim_start();
    rest = rest.find(char::is_whitespace).map_or("", |i| &rest[i..]);
    loop {
        rest = rest.trim_start();
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim();
        let value_part = rest[eq + 1..].trim_start();
        let Some(quote) = value_part.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(close) = value_part[1..].find(quote) else {
            break;
        };
        attributes.push((key, &value_part[1..close + 1]));
        rest = &value_part[close + 2..];
    }
    attributes
}

/// Returns an OME-XML description for a (field, channel, row, column) stack of u16 pages.
///
/// Fields of view are recorded as time points, so the page order is channel fastest, then
/// field: `DimensionOrder="XYCZT"` with `SizeZ="1"`.
pub fn ome_xml(fields: usize, plane: PlaneShape) -> String {
    let mut planes = String::new();
    for t in 0..fields {
        for c in 0..plane.channels {
            planes.push_str(&format!(
                "<TiffData IFD=\"{}\" FirstC=\"{}\" FirstT=\"{}\" FirstZ=\"0\" PlaneCount=\"1\"/>",
                t * plane.channels + c,
                c,
                t
            ));
        }
    }
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<OME xmlns=\"http://www.openmicroscopy.org/Schemas/OME/2016-06\">",
            "<Image ID=\"Image:0\" Name=\"max projection\">",
            "<Pixels ID=\"Pixels:0\" DimensionOrder=\"XYCZT\" Type=\"uint16\" ",
            "SizeX=\"{}\" SizeY=\"{}\" SizeC=\"{}\" SizeZ=\"1\" SizeT=\"{}\">",
            "{}",
            "</Pixels></Image></OME>"
        ),
        plane.columns, plane.rows, plane.channels, fields, planes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imagej_hyperstack() {
        let description = "ImageJ=1.11a\nimages=24\nchannels=2\nslices=4\nframes=3\nhyperstack=true\n";
        let layout = page_layout(description).unwrap().unwrap();
        assert_eq!("TZC", layout.codes());
        assert_eq!(vec![3, 4, 2], layout.shape());
    }

    #[test]
    fn imagej_plain_stack() {
        let layout = page_layout("ImageJ=1.11a\nimages=5\nslices=5\n").unwrap().unwrap();
        assert_eq!(vec![1, 5, 1], layout.shape());
    }

    #[test]
    fn imagej_invalid_value() {
        assert!(page_layout("ImageJ=1.11a\nchannels=two\n").unwrap().is_err());
    }

    #[test]
    fn ome_dimension_order() {
        let description = r#"<?xml version="1.0"?><OME><Image ID="Image:0"><Pixels ID="Pixels:0" DimensionOrder="XYZCT" Type="uint16" SizeX="8" SizeY="8" SizeZ="5" SizeC="2" SizeT="3"></Pixels></Image></OME>"#;
        let layout = page_layout(description).unwrap().unwrap();
        assert_eq!("TCZ", layout.codes());
        assert_eq!(vec![3, 2, 5], layout.shape());
    }

    #[test]
    fn ome_with_namespace_prefix() {
        let description = "<OME><ome:Pixels\n  DimensionOrder='XYCZT'\n  SizeC='2' SizeT='4'/></OME>";
        let layout = page_layout(description).unwrap().unwrap();
        assert_eq!("TZC", layout.codes());
        assert_eq!(vec![4, 1, 2], layout.shape());
    }

    #[test]
    fn ome_skips_comments_and_cdata() {
        let description = r#"<OME><!-- <Pixels DimensionOrder="XYZCT" SizeZ="9"/> --><Description><![CDATA[<Pixels SizeZ="7">]]></Description><Pixels DimensionOrder="XYCZT" SizeC="2" SizeT="4"/></OME>"#;
        let layout = page_layout(description).unwrap().unwrap();
        assert_eq!("TZC", layout.codes());
        assert_eq!(vec![4, 1, 2], layout.shape());
    }

    #[test]
    fn ome_unsupported_order() {
        let description = r#"<OME><Pixels DimensionOrder="ZCTXY"/></OME>"#;
        assert!(page_layout(description).unwrap().is_err());
    }

    #[test]
    fn ome_without_pixels() {
        assert!(page_layout("<OME><Image/></OME>").is_none());
    }

    #[test]
    fn unknown_description() {
        assert!(page_layout("written by some camera").is_none());
    }

    #[test]
    fn generated_ome_round_trips_layout() {
        let xml = ome_xml(3, PlaneShape::new(2, 16, 8));
        let layout = page_layout(&xml).unwrap().unwrap();
        assert_eq!("TZC", layout.codes());
        assert_eq!(vec![3, 1, 2], layout.shape());
        assert!(xml.contains("SizeX=\"8\" SizeY=\"16\""));
        assert_eq!(6, xml.matches("<TiffData").count());
    }

    #[test]
    fn attributes() {
        let attributes = parse_attributes("Pixels a=\"1\" b = '2'  c=\"x y\"");
        assert_eq!(vec![("a", "1"), ("b", "2"), ("c", "x y")], attributes);
    }
}
