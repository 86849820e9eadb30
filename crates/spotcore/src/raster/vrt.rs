//! VRT mosaic descriptors.
//!
//! [`write_vrt`] stitches north-up tiles sharing a pixel size into one
//! `VRTDataset` XML document referencing each tile by path, without copying
//! pixels. [`VrtDataset`] reads such a document back (ours, or a simple one
//! written by `gdalbuildvrt`) and composes scanlines from the tiles.

use std::fmt::Display;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use log::warn;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::{
    check_band, check_row, ColorRole, GeoTransform, MosaicRequest, RasterDataset, RasterError,
    RasterResult,
};

/// Opens one tile referenced by a descriptor.
pub type TileOpener<'a> = dyn Fn(&Path) -> RasterResult<Box<dyn RasterDataset>> + 'a;

struct TileInfo {
    path: PathBuf,
    width: usize,
    height: usize,
    transform: GeoTransform,
}

/// Write a VRT descriptor for `request.tiles` to `request.output`.
pub fn write_vrt(request: &MosaicRequest<'_>, open: &TileOpener<'_>) -> RasterResult<()> {
    let first_path = request
        .tiles
        .first()
        .ok_or_else(|| RasterError::Mosaic("no tiles to mosaic".into()))?;

    // ---------------------------------------------------------------------
    // Reference tile: band layout, pixel size and spatial reference.
    // ---------------------------------------------------------------------
    let reference = open(first_path)?;
    let band_count = reference.band_count();
    let reference_transform = reference.geo_transform()?;
    let (res_x, res_y) = (
        reference_transform.pixel_width.abs(),
        reference_transform.pixel_height.abs(),
    );
    let epsg = reference.epsg();

    let mut bands = Vec::with_capacity(band_count);
    for band in 1..=band_count {
        bands.push((reference.color_role(band)?, reference.no_data_value(band)?));
    }
    drop(reference);

    // ---------------------------------------------------------------------
    // Every tile: check compatibility and grow the union extent.
    // ---------------------------------------------------------------------
    let mut tiles = Vec::with_capacity(request.tiles.len());
    let (mut min_x, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut max_x, mut min_y) = (f64::NEG_INFINITY, f64::INFINITY);

    for path in request.tiles {
        let tile = open(path)?;
        let transform = tile.geo_transform()?;

        if !transform.is_north_up() {
            return Err(RasterError::Mosaic(format!("{} is rotated", path.display())));
        }

        if tile.band_count() != band_count {
            return Err(RasterError::Mosaic(format!(
                "{} has {} bands, expected {band_count}",
                path.display(),
                tile.band_count()
            )));
        }

        if tile.epsg() != epsg {
            if !request.allow_projection_difference {
                return Err(RasterError::Mosaic(format!(
                    "{} has EPSG {:?}, expected {:?}",
                    path.display(),
                    tile.epsg(),
                    epsg
                )));
            }
            warn!("{} has EPSG {:?}, mosaic uses {:?}", path.display(), tile.epsg(), epsg);
        }

        let (width, height) = tile.size();
        min_x = min_x.min(transform.origin_x);
        max_x = max_x.max(transform.origin_x + width as f64 * transform.pixel_width.abs());
        max_y = max_y.max(transform.origin_y);
        min_y = min_y.min(transform.origin_y - height as f64 * transform.pixel_height.abs());

        tiles.push(TileInfo {
            path: path.clone(),
            width,
            height,
            transform,
        });
    }

    let total_w = (((max_x - min_x) / res_x).round() as usize).max(1);
    let total_h = (((max_y - min_y) / res_y).round() as usize).max(1);

    // ---------------------------------------------------------------------
    // Emit XML.
    // ---------------------------------------------------------------------
    let mut buffer = Vec::new();
    let mut writer = Writer::new_with_indent(Cursor::new(&mut buffer), b' ', 2);

    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let (total_w, total_h) = (total_w.to_string(), total_h.to_string());
    let mut root = BytesStart::new("VRTDataset");
    root.push_attribute(("rasterXSize", total_w.as_str()));
    root.push_attribute(("rasterYSize", total_h.as_str()));
    emit(&mut writer, Event::Start(root))?;

    if let Some(code) = epsg {
        text_element(&mut writer, BytesStart::new("SRS"), &format!("EPSG:{code}"))?;
    }
    text_element(
        &mut writer,
        BytesStart::new("GeoTransform"),
        &format!("{min_x}, {res_x}, 0, {max_y}, 0, {}", -res_y),
    )?;

    for (index, (role, no_data)) in bands.iter().enumerate() {
        let band = (index + 1).to_string();
        let mut band_start = BytesStart::new("VRTRasterBand");
        band_start.push_attribute(("dataType", "Float64"));
        band_start.push_attribute(("band", band.as_str()));
        emit(&mut writer, Event::Start(band_start))?;

        text_element(&mut writer, BytesStart::new("ColorInterp"), role.vrt_name())?;
        if let Some(value) = no_data {
            text_element(&mut writer, BytesStart::new("NoDataValue"), &value.to_string())?;
        }

        for tile in &tiles {
            let dst = Rect {
                x_off: ((tile.transform.origin_x - min_x) / res_x).round() as i64,
                y_off: ((max_y - tile.transform.origin_y) / res_y).round() as i64,
                x_size: (tile.width as f64 * tile.transform.pixel_width.abs() / res_x).round() as i64,
                y_size: (tile.height as f64 * tile.transform.pixel_height.abs() / res_y).round() as i64,
            };
            let src = Rect {
                x_off: 0,
                y_off: 0,
                x_size: tile.width as i64,
                y_size: tile.height as i64,
            };

            emit(&mut writer, Event::Start(BytesStart::new("SimpleSource")))?;
            let mut file = BytesStart::new("SourceFilename");
            file.push_attribute(("relativeToVRT", "0"));
            text_element(&mut writer, file, &tile.path.to_string_lossy())?;
            text_element(&mut writer, BytesStart::new("SourceBand"), &band)?;
            emit(&mut writer, Event::Empty(src.to_start("SrcRect")))?;
            emit(&mut writer, Event::Empty(dst.to_start("DstRect")))?;
            emit(&mut writer, Event::End(BytesEnd::new("SimpleSource")))?;
        }

        emit(&mut writer, Event::End(BytesEnd::new("VRTRasterBand")))?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("VRTDataset")))?;

    fs::write(request.output, buffer)?;
    Ok(())
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> RasterResult<()> {
    writer
        .write_event(event)
        .map_err(|e| RasterError::Mosaic(format!("failed to write VRT: {e}")))
}

/// `<name attrs>text</name>`, with `text` escaped.
fn text_element<W: Write>(writer: &mut Writer<W>, start: BytesStart<'_>, text: &str) -> RasterResult<()> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(end))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x_off: i64,
    y_off: i64,
    x_size: i64,
    y_size: i64,
}

impl Rect {
    fn to_start(self, name: &str) -> BytesStart<'_> {
        let mut start = BytesStart::new(name);
        for (key, value) in [
            ("xOff", self.x_off),
            ("yOff", self.y_off),
            ("xSize", self.x_size),
            ("ySize", self.y_size),
        ] {
            start.push_attribute((key, value.to_string().as_str()));
        }
        start
    }
}

struct VrtSource {
    dataset: Box<dyn RasterDataset>,
    band: usize,
    src: Rect,
    dst: Rect,
}

struct VrtBand {
    role: ColorRole,
    no_data: Option<f64>,
    sources: Vec<VrtSource>,
}

/// A parsed VRT mosaic with its tiles opened.
pub struct VrtDataset {
    path: PathBuf,
    width: usize,
    height: usize,
    transform: GeoTransform,
    epsg: Option<u32>,
    bands: Vec<VrtBand>,
}

impl VrtDataset {
    pub fn open(path: &Path, open_tile: &TileOpener<'_>) -> RasterResult<Self> {
        let xml = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let root = parse_document(&xml)?;
        if root.name != "VRTDataset" {
            return Err(RasterError::Open(format!("{} is not a VRT", path.display())));
        }
        let width = parse_attr::<usize>(&root, "rasterXSize")?;
        let height = parse_attr::<usize>(&root, "rasterYSize")?;

        let transform = match root.child_text("GeoTransform") {
            Some(text) => {
                let values: Vec<f64> = text
                    .split(',')
                    .map(|v| v.trim().parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| RasterError::Open(format!("bad GeoTransform: {e}")))?;
                let coefficients: [f64; 6] = values
                    .try_into()
                    .map_err(|_| RasterError::Open("GeoTransform needs 6 values".into()))?;
                GeoTransform::from_coefficients(coefficients)
            }
            None => GeoTransform::IDENTITY,
        };

        let epsg = root.child_text("SRS").and_then(parse_epsg);

        let mut bands = Vec::new();
        for band in root.children_named("VRTRasterBand") {
            let role = band
                .child_text("ColorInterp")
                .map(ColorRole::from_vrt_name)
                .unwrap_or(ColorRole::Undefined);
            let no_data = band.child_text("NoDataValue").and_then(|v| v.parse::<f64>().ok());

            let mut sources = Vec::new();
            for source in band
                .children
                .iter()
                .filter(|c| c.name == "SimpleSource" || c.name == "ComplexSource")
            {
                sources.push(parse_source(source, base, open_tile)?);
            }

            bands.push(VrtBand { role, no_data, sources });
        }

        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
            transform,
            epsg,
            bands,
        })
    }

    fn band(&self, band: usize) -> RasterResult<&VrtBand> {
        check_band(band, self.bands.len())?;
        Ok(&self.bands[band - 1])
    }
}

fn parse_source(source: &Element, base: &Path, open_tile: &TileOpener<'_>) -> RasterResult<VrtSource> {
    let file_element = source
        .child("SourceFilename")
        .ok_or_else(|| RasterError::Open("source without SourceFilename".into()))?;
    let relative = file_element.attr("relativeToVRT").map_or(false, |v| v.trim() == "1");
    let file = file_element.text.trim();
    if file.is_empty() {
        return Err(RasterError::Open("empty SourceFilename".into()));
    }
    let file = if relative { base.join(file) } else { PathBuf::from(file) };

    let band = source
        .child_text("SourceBand")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1);

    let dataset = open_tile(&file)?;
    let (tile_w, tile_h) = dataset.size();
    let whole = Rect {
        x_off: 0,
        y_off: 0,
        x_size: tile_w as i64,
        y_size: tile_h as i64,
    };

    let src = source.child("SrcRect").map(parse_rect).transpose()?.unwrap_or(whole);
    let dst = source.child("DstRect").map(parse_rect).transpose()?.unwrap_or(whole);

    Ok(VrtSource {
        dataset,
        band,
        src,
        dst,
    })
}

impl RasterDataset for VrtDataset {
    fn path(&self) -> &Path {
        &self.path
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn color_role(&self, band: usize) -> RasterResult<ColorRole> {
        Ok(self.band(band)?.role)
    }

    fn no_data_value(&self, band: usize) -> RasterResult<Option<f64>> {
        Ok(self.band(band)?.no_data)
    }

    fn geo_transform(&self) -> RasterResult<GeoTransform> {
        Ok(self.transform)
    }

    fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    fn metadata_item(&self, _key: &str) -> Option<String> {
        None
    }

    fn read_scanline(&self, band: usize, row: usize, out: &mut [f64]) -> RasterResult<()> {
        let vrt_band = self.band(band)?;
        check_row(row, self.height)?;
        if out.len() < self.width {
            return Err(RasterError::Read(format!(
                "scanline buffer holds {} values, need {}",
                out.len(),
                self.width
            )));
        }

        // Uncovered pixels read as nodata, or 0 (transparent) without one.
        out[..self.width].fill(vrt_band.no_data.unwrap_or(0.0));

        let row = row as i64;
        let mut line = Vec::new();
        for source in &vrt_band.sources {
            let dst = source.dst;
            if row < dst.y_off || row >= dst.y_off + dst.y_size || dst.x_size <= 0 || dst.y_size <= 0 {
                continue;
            }

            let (tile_w, tile_h) = source.dataset.size();
            let src_row = source.src.y_off + (row - dst.y_off) * source.src.y_size / dst.y_size;
            if src_row < 0 || src_row >= tile_h as i64 {
                continue;
            }

            line.resize(tile_w, 0.0);
            source.dataset.read_scanline(source.band, src_row as usize, &mut line)?;

            for dx in 0..dst.x_size {
                let x = dst.x_off + dx;
                if x < 0 || x >= self.width as i64 {
                    continue;
                }
                let src_col = source.src.x_off + dx * source.src.x_size / dst.x_size;
                if src_col < 0 || src_col >= tile_w as i64 {
                    continue;
                }
                out[x as usize] = line[src_col as usize];
            }
        }

        Ok(())
    }

    fn resample(&self, resolution: f64) -> RasterResult<Box<dyn RasterDataset>> {
        Ok(Box::new(super::memory::resample_nearest(self, resolution)?))
    }
}

// -------------------------------------------------------------------------
// Document tree
// -------------------------------------------------------------------------

/// One XML element with its attributes, text and children.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> RasterResult<Self> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
            attributes.push((key, value));
        }

        Ok(Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.trim())
    }
}

fn xml_err(e: impl Display) -> RasterError {
    RasterError::Open(format!("invalid VRT XML: {e}"))
}

fn parse_document(xml: &str) -> RasterResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(Element::from_start(e)?),
            Ok(Event::Empty(ref e)) => {
                let element = Element::from_start(e)?;
                attach(&mut stack, &mut root, element);
            }
            Ok(Event::Text(ref e)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&e.unescape().map_err(xml_err)?);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e)),
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| RasterError::Open("empty XML document".into()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            root.get_or_insert(element);
        }
    }
}

fn parse_attr<T: std::str::FromStr>(element: &Element, name: &str) -> RasterResult<T> {
    element
        .attr(name)
        .and_then(|v| v.trim().parse::<T>().ok())
        .ok_or_else(|| RasterError::Open(format!("missing or invalid {name}")))
}

fn parse_rect(element: &Element) -> RasterResult<Rect> {
    // GDAL may write fractional offsets; whole pixels are enough here.
    let get = |name: &str| -> RasterResult<i64> {
        element
            .attr(name)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v.round() as i64)
            .ok_or_else(|| RasterError::Open(format!("rect without {name}")))
    };

    Ok(Rect {
        x_off: get("xOff")?,
        y_off: get("yOff")?,
        x_size: get("xSize")?,
        y_size: get("ySize")?,
    })
}

fn parse_epsg(srs: &str) -> Option<u32> {
    if let Some(code) = srs.strip_prefix("EPSG:") {
        return code.trim().parse().ok();
    }

    // WKT: the last AUTHORITY["EPSG","xxxx"] belongs to the outermost CRS.
    let marker = "AUTHORITY[\"EPSG\",\"";
    let pos = srs.rfind(marker)?;
    let rest = &srs[pos + marker.len()..];
    rest.split('"').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::memory::MemoryDataset;
    use std::collections::HashMap;

    fn tile(path: &str, origin_x: f64, origin_y: f64, value: f64) -> MemoryDataset {
        MemoryDataset::new(path, 2, 2, GeoTransform::north_up(origin_x, origin_y, 1.0, 1.0))
            .with_constant_band(ColorRole::Gray, value)
            .with_constant_band(ColorRole::Alpha, 255.0)
            .with_epsg(25830)
    }

    fn opener(tiles: Vec<MemoryDataset>) -> impl Fn(&Path) -> RasterResult<Box<dyn RasterDataset>> {
        let map: HashMap<PathBuf, MemoryDataset> =
            tiles.into_iter().map(|t| (t.path().to_path_buf(), t)).collect();
        move |p: &Path| {
            map.get(p)
                .cloned()
                .map(|d| Box::new(d) as Box<dyn RasterDataset>)
                .ok_or_else(|| RasterError::Open(p.display().to_string()))
        }
    }

    #[test]
    fn writes_and_reads_back_a_two_tile_mosaic() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("block.vrt");
        let manifest = dir.path().join("list.txt");
        let paths = vec![PathBuf::from("/t/a.tif"), PathBuf::from("/t/b.tif")];
        let open = opener(vec![tile("/t/a.tif", 0.0, 2.0, 1.0), tile("/t/b.tif", 2.0, 2.0, 2.0)]);

        write_vrt(
            &MosaicRequest {
                output: &output,
                manifest: &manifest,
                tiles: &paths,
                allow_projection_difference: true,
            },
            &open,
        )
        .unwrap();

        let vrt = VrtDataset::open(&output, &open).unwrap();
        assert_eq!(vrt.size(), (4, 2));
        assert_eq!(vrt.band_count(), 2);
        assert_eq!(vrt.color_role(2).unwrap(), ColorRole::Alpha);
        assert_eq!(vrt.epsg(), Some(25830));

        let mut line = vec![0.0; 4];
        vrt.read_scanline(1, 1, &mut line).unwrap();
        assert_eq!(line, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn gaps_between_tiles_read_as_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("gap.vrt");
        let paths = vec![PathBuf::from("/t/a.tif"), PathBuf::from("/t/c.tif")];
        let open = opener(vec![tile("/t/a.tif", 0.0, 2.0, 1.0), tile("/t/c.tif", 4.0, 2.0, 3.0)]);

        write_vrt(
            &MosaicRequest {
                output: &output,
                manifest: &output,
                tiles: &paths,
                allow_projection_difference: true,
            },
            &open,
        )
        .unwrap();

        let vrt = VrtDataset::open(&output, &open).unwrap();
        let mut alpha = vec![0.0; 6];
        vrt.read_scanline(2, 0, &mut alpha).unwrap();
        assert_eq!(alpha, vec![255.0, 255.0, 0.0, 0.0, 255.0, 255.0]);
    }

    #[test]
    fn projection_mismatch_needs_permission() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("p.vrt");
        let paths = vec![PathBuf::from("/t/a.tif"), PathBuf::from("/t/b.tif")];
        let other = tile("/t/b.tif", 2.0, 2.0, 2.0).with_epsg(4326);
        let open = opener(vec![tile("/t/a.tif", 0.0, 2.0, 1.0), other]);

        let request = MosaicRequest {
            output: &output,
            manifest: &output,
            tiles: &paths,
            allow_projection_difference: false,
        };
        assert!(matches!(write_vrt(&request, &open), Err(RasterError::Mosaic(_))));

        let request = MosaicRequest {
            allow_projection_difference: true,
            ..request
        };
        assert!(write_vrt(&request, &open).is_ok());
    }

    #[test]
    fn reads_gdal_style_complex_sources_with_relative_paths() {
        let xml = r#"<VRTDataset rasterXSize="2" rasterYSize="2">
  <SRS dataAxisToSRSAxisMapping="1,2">PROJCS["ETRS89 / UTM zone 30N",AUTHORITY[&quot;EPSG&quot;,&quot;25830&quot;]]</SRS>
  <GeoTransform>  0.0,  1.0,  0.0,  2.0,  0.0, -1.0</GeoTransform>
  <VRTRasterBand dataType="Float32" band="1">
    <NoDataValue>-9999</NoDataValue>
    <ComplexSource>
      <SourceFilename relativeToVRT="1">tiles/a.tif</SourceFilename>
      <SourceBand>1</SourceBand>
      <SrcRect xOff="0" yOff="0" xSize="2" ySize="2" />
      <DstRect xOff="0" yOff="0" xSize="2" ySize="2" />
    </ComplexSource>
  </VRTRasterBand>
</VRTDataset>"#;
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("g.vrt");
        fs::write(&output, xml).unwrap();

        let tile_path = dir.path().join("tiles/a.tif");
        let open = opener(vec![MemoryDataset::new(&tile_path, 2, 2, GeoTransform::north_up(0.0, 2.0, 1.0, 1.0))
            .with_constant_band(ColorRole::Gray, 7.0)]);

        let vrt = VrtDataset::open(&output, &open).unwrap();
        assert_eq!(vrt.epsg(), Some(25830));
        assert_eq!(vrt.no_data_value(1).unwrap(), Some(-9999.0));
        let mut line = vec![0.0; 2];
        vrt.read_scanline(1, 0, &mut line).unwrap();
        assert_eq!(line, vec![7.0, 7.0]);
    }

    #[test]
    fn tile_paths_with_markup_characters_survive() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("odd.vrt");
        let paths = vec![PathBuf::from("/t/north & south <1>.tif")];
        let open = opener(vec![tile("/t/north & south <1>.tif", 0.0, 2.0, 4.0)]);

        write_vrt(
            &MosaicRequest {
                output: &output,
                manifest: &output,
                tiles: &paths,
                allow_projection_difference: true,
            },
            &open,
        )
        .unwrap();

        let written = fs::read_to_string(&output).unwrap();
        assert!(written.contains("north &amp; south &lt;1&gt;.tif"));

        let vrt = VrtDataset::open(&output, &open).unwrap();
        let mut line = vec![0.0; 2];
        vrt.read_scanline(1, 0, &mut line).unwrap();
        assert_eq!(line, vec![4.0, 4.0]);
    }

    #[test]
    fn document_tree_skips_comments_and_reads_cdata() {
        let xml = r#"<?xml version="1.0"?>
<!-- hand edited -->
<VRTDataset rasterXSize="3" rasterYSize="1">
  <VRTRasterBand band="1"><NoDataValue><![CDATA[-9999]]></NoDataValue></VRTRasterBand>
  <VRTRasterBand band="2"><!-- <NoDataValue>1</NoDataValue> --></VRTRasterBand>
</VRTDataset>"#;
        let root = parse_document(xml).unwrap();
        assert_eq!(root.attr("rasterXSize"), Some("3"));

        let bands: Vec<_> = root.children_named("VRTRasterBand").collect();
        assert_eq!(bands.len(), 2);
        assert_eq!(bands[0].child_text("NoDataValue"), Some("-9999"));
        assert!(bands[1].child("NoDataValue").is_none());
    }

    #[test]
    fn malformed_document_is_an_open_error() {
        assert!(matches!(
            parse_document("<VRTDataset><VRTRasterBand></VRTDataset>"),
            Err(RasterError::Open(_))
        ));
    }
}
