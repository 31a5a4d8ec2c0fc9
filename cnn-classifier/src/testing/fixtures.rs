//! On-disk fixtures: configuration documents, image datasets and archives.

#![allow(clippy::expect_used)]

use crate::config::schema::{
    ConfigDocument, DataIngestionSection, EvaluationSection, PrepareBaseModelSection,
    TrainingSection,
};
use crate::utils::write_yaml;
use image::{Rgb, RgbImage};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Writes `config.yaml` and `params.yaml` under `dir` and returns their paths.
///
/// Every artifact path is absolute and lives under `dir/artifacts`, except the
/// exported model which goes to `dir/model`. Params use two classes, SGD at
/// 0.01, seed 7, no augmentation and random weights.
pub fn write_config_files(
    dir: &Path,
    image_size: [usize; 3],
    batch_size: usize,
    epochs: usize,
) -> (PathBuf, PathBuf) {
    let artifacts = dir.join("artifacts");
    let document = ConfigDocument {
        artifacts_root: artifacts.clone(),
        data_ingestion: DataIngestionSection {
            root_dir: artifacts.join("data_ingestion"),
            source_url: "https://drive.google.com/file/d/TESTFILEID/view?usp=sharing".to_string(),
            local_data_file: artifacts.join("data_ingestion/data.zip"),
            unzip_dir: artifacts.join("data_ingestion"),
            dataset_dir: PathBuf::from("dataset"),
        },
        prepare_base_model: PrepareBaseModelSection {
            root_dir: artifacts.join("prepare_base_model"),
            base_model_path: artifacts.join("prepare_base_model/base_model.json"),
            updated_base_model_path: artifacts.join("prepare_base_model/base_model_updated.json"),
        },
        training: TrainingSection {
            root_dir: artifacts.join("training"),
            trained_model_path: artifacts.join("training/model.json"),
            export_model_path: dir.join("model/trained_model.json"),
        },
        evaluation: EvaluationSection {
            root_dir: artifacts.join("evaluation"),
            scores_path: artifacts.join("evaluation/scores.json"),
        },
    };

    let config_path = dir.join("config/config.yaml");
    write_yaml(&config_path, &document).expect("write config.yaml");

    let [height, width, channels] = image_size;
    let params = format!(
        "AUGMENTATION: false\n\
         IMAGE_SIZE: [{height}, {width}, {channels}]\n\
         BATCH_SIZE: {batch_size}\n\
         INCLUDE_TOP: false\n\
         EPOCHS: {epochs}\n\
         CLASSES: 2\n\
         WEIGHTS: none\n\
         LEARNING_RATE: 0.01\n\
         OPTIMIZER: sgd\n\
         SEED: 7\n"
    );
    let params_path = dir.join("params.yaml");
    fs::write(&params_path, params).expect("write params.yaml");

    (config_path, params_path)
}

/// Writes `per_class` PNG images of `size x size` pixels for every class
/// under `root/<class>/img_NNNN.png`.
///
/// Each class gets its own dominant color so a model can tell them apart.
pub fn write_image_dataset(root: &Path, classes: &[&str], per_class: usize, size: u32) {
    for (class_index, class) in classes.iter().enumerate() {
        let class_dir = root.join(class);
        fs::create_dir_all(&class_dir).expect("create class directory");
        let channel = class_index % 3;

        for i in 0..per_class {
            let shade = 120 + ((i * 37) % 100) as u8;
            let image = RgbImage::from_fn(size, size, |x, y| {
                let mut pixel = [((x + y) * 3 % 40) as u8; 3];
                pixel[channel] = shade;
                Rgb(pixel)
            });
            image
                .save(class_dir.join(format!("img_{i:04}.png")))
                .expect("save png");
        }
    }
}

/// Zips every file under `source` into `archive`, with paths relative to
/// `source`.
pub fn zip_directory(source: &Path, archive: &Path) {
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).expect("create archive directory");
    }
    let mut writer = ZipWriter::new(File::create(archive).expect("create archive"));
    let options = SimpleFileOptions::default();

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.expect("walk source directory");
        let relative = entry
            .path()
            .strip_prefix(source)
            .expect("entry under source");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, options).expect("add directory");
        } else {
            writer.start_file(name, options).expect("start file");
            let bytes = fs::read(entry.path()).expect("read source file");
            writer.write_all(&bytes).expect("write zip entry");
        }
    }
    writer.finish().expect("finish archive");
}
