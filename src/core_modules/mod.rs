pub mod association;
pub mod canvas;
pub mod mot_replay;
pub mod observation;
pub mod output_naming;
pub mod tracker;
pub mod trail_table;
pub mod video;
pub mod yolo_decode;
