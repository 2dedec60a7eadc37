use anyhow::{Result, bail};

use super::graph::{FilterGraph, Pad, StreamKind};
use super::inputs::InputList;
use super::text::prepare_title;
use super::util::{escape_ffmpeg_path, even, even_ceil, even_floor, format_time};
use super::{SegmentCompiler, SegmentJob};
use crate::video::config::{Framing, HwAccel, WorkingSpace};
use crate::video::render::ffmpeg::probe::PixelFormats;

/// Scaled size and the crop/pad that brings it to the target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FrameGeometry {
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl FrameGeometry {
    pub fn compute(
        source: (u32, u32),
        target: (u32, u32),
        framing: Framing,
        focus: (f64, f64),
    ) -> Result<Self> {
        let (sw, sh) = source;
        let (tw, th) = target;
        if sw == 0 || sh == 0 {
            bail!("source video reports zero dimensions ({sw}x{sh})");
        }
        let (sw, sh, tw_f, th_f) = (f64::from(sw), f64::from(sh), f64::from(tw), f64::from(th));

        match framing {
            Framing::Crop => {
                let factor = (tw_f / sw).max(th_f / sh);
                let width = even_ceil(sw * factor).max(tw);
                let height = even_ceil(sh * factor).max(th);
                let offset_x = even(f64::from(width - tw) * focus.0).min(width - tw);
                let offset_y = even(f64::from(height - th) * focus.1).min(height - th);
                Ok(Self {
                    scaled_width: width,
                    scaled_height: height,
                    offset_x,
                    offset_y,
                })
            }
            Framing::Scale => {
                let factor = (tw_f / sw).min(th_f / sh);
                let width = even_floor(sw * factor).clamp(2, tw);
                let height = even_floor(sh * factor).clamp(2, th);
                Ok(Self {
                    scaled_width: width,
                    scaled_height: height,
                    offset_x: even(f64::from(tw - width) / 2.0).min(tw - width),
                    offset_y: even(f64::from(th - height) / 2.0).min(th - height),
                })
            }
        }
    }
}

impl SegmentCompiler<'_> {
    pub(super) fn build_video_graph(
        &self,
        graph: &mut FilterGraph,
        inputs: &mut InputList,
        job: &SegmentJob,
        video_input: usize,
    ) -> Result<()> {
        let processing = &self.config.source_video_processing;
        let formats = job.formats;
        let geometry = FrameGeometry::compute(
            (job.video.width, job.video.height),
            (self.target.width, self.target.height),
            processing.framing,
            (processing.crop_focus_x, processing.crop_focus_y),
        )?;

        // GPU scale while frames are still device-resident
        let scale = match processing.hwaccel {
            HwAccel::Cuda => vec![
                format!(
                    "scale_cuda={}:{}",
                    geometry.scaled_width, geometry.scaled_height
                ),
                "hwdownload".to_string(),
                format!("format={}", formats.download),
            ],
            HwAccel::None => vec![format!(
                "scale={}:{}:flags=lanczos",
                geometry.scaled_width, geometry.scaled_height
            )],
        };
        let mut current = graph.chain(StreamKind::Video, Pad::video(video_input), scale, "v_scaled");

        let mut cpu = vec!["setpts=PTS-STARTPTS".to_string()];
        cpu.push(self.framing_filter(&geometry));
        cpu.push("setsar=1".to_string());
        if let Some(fps) = self.config.video_output.fps {
            cpu.push(format!("fps={fps}"));
        }
        cpu.extend(self.color_filters(&formats));
        let sharpen = &self.config.finishing_filters.sharpen;
        if sharpen.enabled {
            cpu.push(format!(
                "unsharp=luma_msize_x={lm}:luma_msize_y={lm}:luma_amount={la}:chroma_msize_x={cm}:chroma_msize_y={cm}:chroma_amount={ca}",
                lm = sharpen.luma_msize,
                la = sharpen.luma_amount,
                cm = sharpen.chroma_msize,
                ca = sharpen.chroma_amount,
            ));
        }
        cpu.push(format!("format={}", formats.cpu));
        current = graph.chain(StreamKind::Video, current, cpu, "v_graded");

        let denoise = &self.config.finishing_filters.denoise;
        if denoise.enabled {
            let filter = if denoise.filter.starts_with("nlmeans") {
                format!(
                    "{}=s={}:p={}:r={}",
                    denoise.filter, denoise.strength, denoise.patch_size, denoise.research_size
                )
            } else {
                denoise.filter.clone()
            };
            current = graph.chain(
                StreamKind::Video,
                current,
                vec![
                    "hwupload".to_string(),
                    filter,
                    "hwdownload".to_string(),
                    format!("format={}", formats.cpu),
                ],
                "v_denoised",
            );
        }

        let visible = format!("between(t,0,{})", format_time(job.plan.duration()));

        if let Some(timer) = &job.timer {
            let ring = &self.config.progress_ring;
            let timer_input = inputs.add(timer, Vec::new());
            let timer_pad = graph.chain(
                StreamKind::Video,
                Pad::video(timer_input),
                vec![
                    format!("scale={}:-1", ring.size),
                    "setpts=PTS-STARTPTS".to_string(),
                ],
                "timer",
            );
            graph.push(
                StreamKind::Video,
                vec![current, timer_pad],
                vec![format!(
                    "overlay=x='{}':y='{}':enable='{visible}':eof_action=pass:format={}",
                    ring.x,
                    ring.y,
                    formats.overlay()
                )],
                &["v_timer"],
            );
            current = Pad::label("v_timer");
        }

        if let Some(progress) = job.progress {
            current = self.overlay_progress_bar(graph, job, progress, current);
        }
        if let Some(clip) = &job.next_up {
            current = self.overlay_next_up(graph, inputs, job, clip, current);
        }

        let title = &self.config.text_overlays.exercise_name;
        if title.enabled {
            let mut options = Vec::new();
            if let Some(font) = &title.font_file {
                options.push(format!("fontfile='{}'", escape_ffmpeg_path(font)));
            }
            options.push(format!(
                "text='{}'",
                prepare_title(&job.plan.title, title.wrap_at_char)
            ));
            options.push(format!("fontsize={}", title.font_size));
            options.push(format!("fontcolor={}", title.font_color));
            if title.stroke_width > 0 {
                options.push(format!("borderw={}", title.stroke_width));
                options.push(format!("bordercolor={}", title.stroke_color));
            }
            if title.box_enabled {
                options.push("box=1".to_string());
                options.push(format!("boxcolor={}", title.box_color));
                options.push(format!("boxborderw={}", title.box_padding));
            }
            options.push(format!("x='{}'", title.position_x));
            options.push(format!("y='{}'", title.position_y));
            options.push(format!("enable='{visible}'"));
            current = graph.chain(
                StreamKind::Video,
                current,
                vec![format!("drawtext={}", options.join(":"))],
                "v_titled",
            );
        }

        graph.chain(
            StreamKind::Video,
            current,
            vec![format!("format={}", formats.encode)],
            "vout",
        );
        graph.map_output("vout");
        Ok(())
    }

    fn framing_filter(&self, geometry: &FrameGeometry) -> String {
        let processing = &self.config.source_video_processing;
        let (tw, th) = (self.target.width, self.target.height);
        match processing.framing {
            Framing::Crop => format!(
                "crop={tw}:{th}:{}:{}",
                geometry.offset_x, geometry.offset_y
            ),
            Framing::Scale => format!(
                "pad={tw}:{th}:{}:{}:color={}",
                geometry.offset_x, geometry.offset_y, processing.pad_color
            ),
        }
    }

    /// Expand to full range, grade in RGB, return to limited-range YUV.
    fn color_filters(&self, formats: &PixelFormats) -> Vec<String> {
        let grading = &self.config.source_video_processing.color_grading;
        if !grading.is_active() {
            return Vec::new();
        }

        let mut filters = Vec::new();
        match grading.working_space {
            WorkingSpace::FullRange => {
                filters.push("scale=in_range=tv:out_range=pc".to_string());
            }
            WorkingSpace::Linear => filters.push(
                "zscale=rangein=limited:range=full:transferin=bt709:transfer=linear:npl=100"
                    .to_string(),
            ),
        }
        filters.push(format!("format={}", formats.working));
        for lut in &grading.luts {
            filters.push(format!(
                "lut3d=file='{}':interp={}",
                escape_ffmpeg_path(lut),
                grading.interp
            ));
        }
        match grading.working_space {
            WorkingSpace::FullRange => {
                filters.push("scale=in_range=pc:out_range=tv".to_string());
            }
            WorkingSpace::Linear => filters.push(
                "zscale=rangein=full:range=limited:transferin=linear:transfer=bt709".to_string(),
            ),
        }
        filters
    }
}
