use super::graph::{FilterGraph, Pad, StreamKind};
use super::inputs::{InputList, layout_options, range_options};
use super::util::format_time;
use super::{SegmentCompiler, SegmentJob};
use crate::video::config::ChannelLayout;

/// How the segment's audio reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AudioRoute {
    /// Stream-copy the first audio stream of this input
    Copy(usize),
    /// Encode the graph's `[aout]`
    Filtered,
}

/// Explicit channel mapping between layouts.
fn remix(from: ChannelLayout, to: ChannelLayout) -> Option<String> {
    match (from, to) {
        (ChannelLayout::Mono, ChannelLayout::Stereo) => Some("pan=stereo|c0=c0|c1=c0".to_string()),
        (ChannelLayout::Stereo, ChannelLayout::Mono) => {
            Some("pan=mono|c0=0.5*c0+0.5*c1".to_string())
        }
        _ => None,
    }
}

/// Pin format, rate and declared layout, then remix to the mix layout.
fn conform(from: ChannelLayout, to: ChannelLayout, sample_rate: u32) -> Vec<String> {
    let mut filters = vec![format!(
        "aformat=sample_fmts=fltp:sample_rates={sample_rate}:channel_layouts={}",
        from.as_str()
    )];
    filters.extend(remix(from, to));
    filters
}

impl SegmentCompiler<'_> {
    pub(super) fn build_audio_graph(
        &self,
        graph: &mut FilterGraph,
        inputs: &mut InputList,
        job: &SegmentJob,
        audio_input: Option<usize>,
    ) -> AudioRoute {
        let out = self.output_layout();
        let sample_rate = self.config.video_output.audio_sample_rate;
        let duration = format_time(job.plan.duration());
        let source = audio_input.zip(job.source_audio);

        if job.effects.is_empty() && job.music.is_empty() {
            match source {
                Some((index, layout)) => match remix(layout, out) {
                    None => return AudioRoute::Copy(index),
                    Some(pan) => {
                        graph.chain(StreamKind::Audio, Pad::audio(index), vec![pan], "aout");
                    }
                },
                None => {
                    graph.push(
                        StreamKind::Audio,
                        Vec::new(),
                        vec![
                            format!("anullsrc=r={sample_rate}:cl={}", out.as_str()),
                            format!("atrim=duration={duration}"),
                        ],
                        &["aout"],
                    );
                }
            }
            graph.map_output("aout");
            return AudioRoute::Filtered;
        }

        let base = match source {
            Some((index, layout)) => {
                let mut filters = conform(layout, out, sample_rate);
                filters.push("asetpts=PTS-STARTPTS".to_string());
                graph.chain(StreamKind::Audio, Pad::audio(index), filters, "a_src")
            }
            None => {
                graph.push(
                    StreamKind::Audio,
                    Vec::new(),
                    vec![
                        format!("anullsrc=r={sample_rate}:cl={}", out.as_str()),
                        format!("atrim=duration={duration}"),
                    ],
                    &["a_src"],
                );
                Pad::label("a_src")
            }
        };

        let effects = self.build_effect_bus(graph, inputs, job, out, sample_rate);
        let music = self.build_music_bed(graph, inputs, job, out, sample_rate, &duration);

        let mut mix = vec![base];
        let ducking = &self.config.background_music.ducking;
        match (music, effects) {
            (Some(music), Some(effects)) if ducking.enabled => {
                // The key copy only drives the compressor; the mix copy is what is heard
                graph.push(
                    StreamKind::Audio,
                    vec![effects],
                    vec!["asplit=2".to_string()],
                    &["fx_key", "fx_mix"],
                );
                graph.push(
                    StreamKind::Audio,
                    vec![music, Pad::label("fx_key")],
                    vec![format!(
                        "sidechaincompress=threshold={}:ratio={}:attack={}:release={}:makeup={}",
                        ducking.threshold,
                        ducking.ratio,
                        ducking.attack,
                        ducking.release,
                        ducking.makeup
                    )],
                    &["music_ducked"],
                );
                mix.push(Pad::label("music_ducked"));
                mix.push(Pad::label("fx_mix"));
            }
            (music, effects) => {
                mix.extend(music);
                mix.extend(effects);
            }
        }

        let count = mix.len();
        graph.push(
            StreamKind::Audio,
            mix,
            vec![format!(
                "amix=inputs={count}:normalize=0:duration=first:dropout_transition=0"
            )],
            &["aout"],
        );
        graph.map_output("aout");
        AudioRoute::Filtered
    }

    /// One stream per triggered effect, summed into a single bus.
    fn build_effect_bus(
        &self,
        graph: &mut FilterGraph,
        inputs: &mut InputList,
        job: &SegmentJob,
        out: ChannelLayout,
        sample_rate: u32,
    ) -> Option<Pad> {
        let mut labels = Vec::new();
        for (idx, effect) in job.effects.iter().enumerate() {
            let input = inputs.add(&effect.file, layout_options(effect.layout.as_str()));
            let mut filters = conform(effect.layout, out, sample_rate);
            filters.push(format!("volume={:.3}", effect.volume));
            let delay_ms = (effect.delay * 1000.0).round() as u64;
            if delay_ms > 0 {
                filters.push(format!("adelay=delays={delay_ms}:all=1"));
            }
            let label = format!("fx{idx}");
            labels.push(graph.chain(StreamKind::Audio, Pad::audio(input), filters, &label));
        }

        match labels.len() {
            0 => None,
            1 => labels.pop(),
            count => {
                graph.push(
                    StreamKind::Audio,
                    labels,
                    vec![format!(
                        "amix=inputs={count}:normalize=0:duration=longest:dropout_transition=0"
                    )],
                    &["fx_bus"],
                );
                Some(Pad::label("fx_bus"))
            }
        }
    }

    /// Music slices joined end to end, leveled and padded to the segment.
    fn build_music_bed(
        &self,
        graph: &mut FilterGraph,
        inputs: &mut InputList,
        job: &SegmentJob,
        out: ChannelLayout,
        sample_rate: u32,
        duration: &str,
    ) -> Option<Pad> {
        if job.music.is_empty() {
            return None;
        }
        let music = &self.config.background_music;

        let mut labels = Vec::new();
        for (idx, slice) in job.music.iter().enumerate() {
            let mut options = layout_options(music.channel_layout.as_str());
            options.extend(range_options(slice.offset, slice.duration));
            let input = inputs.add(&slice.file, options);
            let mut filters = conform(music.channel_layout, out, sample_rate);
            filters.push("asetpts=PTS-STARTPTS".to_string());
            let label = format!("mus{idx}");
            labels.push(graph.chain(StreamKind::Audio, Pad::audio(input), filters, &label));
        }

        let joined = if labels.len() == 1 {
            labels.remove(0)
        } else {
            let count = labels.len();
            graph.push(
                StreamKind::Audio,
                labels,
                vec![format!("concat=n={count}:v=0:a=1")],
                &["music_joined"],
            );
            Pad::label("music_joined")
        };

        Some(graph.chain(
            StreamKind::Audio,
            joined,
            vec![
                format!("volume={:.3}", music.volume),
                format!("apad=whole_dur={duration}"),
                format!("atrim=duration={duration}"),
            ],
            "music",
        ))
    }
}
