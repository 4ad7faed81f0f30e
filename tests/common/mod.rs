//! GeoTIFF and STAC fixtures shared by the integration tests

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tiff::encoder::colortype::Gray8;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Small 8-bit single-band tile, the layout DSWx WTR layers use
pub struct Tile {
    pub x0: f64,
    pub y0: f64,
    pub resolution: f64,
    pub epsg: u16,
    pub width: u32,
    pub height: u32,
    pub values: Vec<u8>,
    pub nodata: Option<u8>,
}

impl Tile {
    pub fn new(x0: f64, y0: f64, width: u32, height: u32, values: Vec<u8>) -> Self {
        assert_eq!(values.len(), (width * height) as usize);
        Self {
            x0,
            y0,
            resolution: 30.0,
            epsg: 32611,
            width,
            height,
            values,
            nodata: Some(255),
        }
    }

    pub fn epsg(mut self, epsg: u16) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn write(&self, path: &Path) {
        let file = File::create(path).expect("Failed to create fixture");
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).expect("Failed to start TIFF");
        let mut image = encoder
            .new_image::<Gray8>(self.width, self.height)
            .expect("Failed to start image");

        let dir = image.encoder();
        dir.write_tag(Tag::Unknown(33550), &[self.resolution, self.resolution, 0.0][..])
            .expect("pixel scale");
        dir.write_tag(Tag::Unknown(33922), &[0.0, 0.0, 0.0, self.x0, self.y0, 0.0][..])
            .expect("tiepoint");
        let geokeys: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, self.epsg];
        dir.write_tag(Tag::Unknown(34735), &geokeys[..]).expect("geokeys");
        if let Some(nodata) = self.nodata {
            dir.write_tag(Tag::Unknown(42113), nodata.to_string().as_str())
                .expect("nodata");
        }
        image.write_data(&self.values).expect("Failed to write pixels");
    }
}

/// DSWx-HLS filename for a tile and acquisition stamp such as `20240301T134411Z`
pub fn dswx_name(tile: &str, acquired: &str, layer: &str) -> String {
    format!("OPERA_L3_DSWx-HLS_{tile}_{acquired}_20240303T000000Z_S2A_30_v1.0_{layer}.tif")
}

/// Write `tile` into `dir` under its DSWx WTR filename and return the path
pub fn write_wtr(dir: &Path, tile_id: &str, acquired: &str, tile: &Tile) -> PathBuf {
    let path = dir.join(dswx_name(tile_id, acquired, "B01_WTR"));
    tile.write(&path);
    path
}

/// STAC item with the given assets, keyed by asset name
pub fn stac_item(id: &str, datetime: &str, assets: &[(&str, &Path)], cloud_cover: Option<f64>) -> Value {
    let mut asset_map = serde_json::Map::new();
    for (key, path) in assets {
        asset_map.insert(
            key.to_string(),
            json!({ "href": path.to_string_lossy(), "type": "image/tiff" }),
        );
    }
    let mut properties = json!({ "datetime": datetime });
    if let Some(cover) = cloud_cover {
        properties["eo:cloud_cover"] = json!(cover);
    }
    json!({
        "type": "Feature",
        "stac_version": "1.0.0",
        "id": id,
        "collection": "OPERA_L3_DSWX-HLS_V1",
        "bbox": [-117.0, 33.0, -116.0, 34.0],
        "properties": properties,
        "assets": asset_map,
    })
}

/// Save items as an ItemCollection document
pub fn write_collection(dir: &Path, items: Vec<Value>) -> PathBuf {
    let path = dir.join("search.json");
    let doc = json!({ "type": "FeatureCollection", "features": items });
    std::fs::write(&path, serde_json::to_string_pretty(&doc).expect("serialize"))
        .expect("Failed to write collection");
    path
}
