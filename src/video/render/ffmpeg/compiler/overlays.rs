use super::graph::{FilterGraph, Pad, StreamKind};
use super::inputs::{self, InputList};
use super::text::escape_drawtext;
use super::util::{escape_ffmpeg_path, even, format_time};
use super::{SegmentCompiler, SegmentJob};
use crate::video::render::overlays::{NextUpClip, WorkoutProgress};

impl SegmentCompiler<'_> {
    /// Track across the frame plus a fill that slides in as the workout
    /// advances.
    pub(super) fn overlay_progress_bar(
        &self,
        graph: &mut FilterGraph,
        job: &SegmentJob,
        progress: WorkoutProgress,
        current: Pad,
    ) -> Pad {
        let bar = &self.config.progress_bar;
        let width = self.target.width;
        let top = bar.top(self.target.height);

        let track = graph.chain(
            StreamKind::Video,
            current,
            vec![format!(
                "drawbox=x=0:y={top}:w=iw:h={}:color={}:t=fill",
                bar.height, bar.background_color
            )],
            "v_bar_track",
        );
        graph.push(
            StreamKind::Video,
            Vec::new(),
            vec![format!(
                "color=c={}:s={width}x{}:d={}",
                bar.foreground_color,
                bar.height,
                format_time(job.plan.duration())
            )],
            &["bar_fill"],
        );
        // fill is a full-width strip shifted left by the remaining fraction
        graph.push(
            StreamKind::Video,
            vec![track, Pad::label("bar_fill")],
            vec![format!(
                "overlay=x='{width}*(min(({}+t)/{},1)-1)':y={top}:eof_action=pass:format={}",
                format_time(progress.elapsed_before),
                format_time(progress.total),
                job.formats.overlay()
            )],
            &["v_progress"],
        );
        Pad::label("v_progress")
    }

    pub(super) fn overlay_next_up(
        &self,
        graph: &mut FilterGraph,
        inputs: &mut InputList,
        job: &SegmentJob,
        clip: &NextUpClip,
        current: Pad,
    ) -> Pad {
        let preview = &self.config.next_up_preview;
        let duration = job.plan.duration();
        let show_at = (duration - preview.show_before_end_seconds).max(0.0);
        let fade = preview.fade_seconds.min(clip.duration / 2.0);
        let width = even(f64::from(self.target.width) * preview.scale).max(2);

        let input = inputs.add(&clip.source, inputs::range_options(clip.start, clip.duration));

        let mut label = Vec::new();
        if let Some(font) = &preview.font_file {
            label.push(format!("fontfile='{}'", escape_ffmpeg_path(font)));
        }
        label.push(format!("text='{}'", escape_drawtext(&preview.label)));
        label.push(format!("fontsize={}", preview.font_size));
        label.push(format!("fontcolor={}", preview.font_color));
        label.push("box=1".to_string());
        label.push(format!("boxcolor={}", preview.box_color));
        label.push(format!("boxborderw={}", preview.font_size / 4));
        label.push("x=(w-text_w)/2".to_string());
        label.push("y=h*0.05".to_string());

        let mut filters = vec![
            format!("fps={}", preview.fps),
            format!("scale={width}:-2"),
            "format=yuva420p".to_string(),
            format!("drawtext={}", label.join(":")),
            format!("setpts=PTS-STARTPTS+{}/TB", format_time(show_at)),
        ];
        if fade > 0.0 {
            filters.push(format!(
                "fade=t=in:st={}:d={}:alpha=1",
                format_time(show_at),
                format_time(fade)
            ));
            filters.push(format!(
                "fade=t=out:st={}:d={}:alpha=1",
                format_time(show_at + clip.duration - fade),
                format_time(fade)
            ));
        }
        let pip = graph.chain(StreamKind::Video, Pad::video(input), filters, "next_up");

        graph.push(
            StreamKind::Video,
            vec![current, pip],
            vec![format!(
                "overlay=x='{}':y='{}':enable='between(t,{},{})':eof_action=pass:format={}",
                preview.x,
                preview.y,
                format_time(show_at),
                format_time(duration),
                job.formats.overlay()
            )],
            &["v_next_up"],
        );
        Pad::label("v_next_up")
    }
}
